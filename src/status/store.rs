//! Thread-safe, in-memory status store
//!
//! The store is the only shared mutable resource in the orchestrator. All
//! access goes through its methods under a single read/write lock; every
//! getter returns a deep copy so a reader can never race a concurrent writer
//! mid-iteration. Nothing here survives a process restart.

use std::sync::RwLock;

use chrono::Utc;
use thiserror::Error;

use super::{Component, Infra, State, Status};

/// Hard ceiling for the log buffer, in bytes.
///
/// Once exceeded, the buffer is truncated from the front so the most recent
/// output is always retained.
pub const LOG_BUFFER_CEILING: usize = 100 * 1024;

/// Prefix inserted when earlier log output has been discarded
const TRUNCATION_MARKER: &str = "-- earlier output truncated --\n";

/// Bookkeeping errors from the status store.
///
/// These indicate a programming-contract violation (a component that was
/// never registered, a description with no state to attach to) and must be
/// surfaced, but callers in the pipeline log them rather than letting a
/// bookkeeping failure abort the substantive operation being reported on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A description cannot be attached before any status exists
    #[error("status state is unset")]
    UnsetState,

    /// The named component was never registered
    #[error("component {0} not found")]
    ComponentNotFound(String),
}

#[derive(Debug, Default)]
struct Inner {
    status: Option<Status>,
    components: Vec<Component>,
    logs: String,
}

/// Thread-safe holder of overall and per-component status plus the bounded
/// log buffer.
///
/// Reads take the shared lock, writes take the exclusive lock. No lock is
/// ever held across an await point; all methods are synchronous.
#[derive(Debug, Default)]
pub struct StatusStore {
    inner: RwLock<Inner>,
}

impl StatusStore {
    /// Create an empty store with no status set
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep copy of the full aggregate.
    ///
    /// Fails with [`StoreError::UnsetState`] until a status has been set.
    pub fn get(&self) -> Result<Infra, StoreError> {
        let inner = self.inner.read().expect("status store lock poisoned");
        let status = inner.status.clone().ok_or(StoreError::UnsetState)?;
        Ok(Infra {
            status,
            components: inner.components.clone(),
            logs: inner.logs.clone(),
        })
    }

    /// Deep copy of the overall status.
    pub fn get_status(&self) -> Result<Status, StoreError> {
        let inner = self.inner.read().expect("status store lock poisoned");
        inner.status.clone().ok_or(StoreError::UnsetState)
    }

    /// Overwrite the overall status. The store stamps `last_updated`.
    pub fn set_status(&self, state: State, description: impl Into<String>) {
        let mut inner = self.inner.write().expect("status store lock poisoned");
        inner.status = Some(Status::new(state, description));
    }

    /// Overwrite only the overall description, keeping the current state.
    ///
    /// Fails with [`StoreError::UnsetState`] if no status has ever been set —
    /// a description cannot be attached to an undefined state.
    pub fn set_status_desc(&self, description: impl Into<String>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("status store lock poisoned");
        let current = inner.status.as_mut().ok_or(StoreError::UnsetState)?;
        current.description = description.into();
        current.last_updated = Utc::now();
        Ok(())
    }

    /// Register a component, seeding it `Pending`.
    ///
    /// Registering an already-known name resets that entry to `Pending`
    /// without changing its position; membership stays append-only.
    pub fn register_component(&self, name: impl Into<String>) {
        let name = name.into();
        let mut inner = self.inner.write().expect("status store lock poisoned");
        if let Some(existing) = inner.components.iter_mut().find(|c| c.name == name) {
            existing.status = Status::pending();
        } else {
            inner.components.push(Component {
                name,
                status: Status::pending(),
            });
        }
    }

    /// Overwrite one component's status. The store stamps `last_updated`.
    ///
    /// Fails with [`StoreError::ComponentNotFound`] for names that were never
    /// registered; the store is unchanged on error.
    pub fn set_component_status(&self, name: &str, status: Status) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("status store lock poisoned");
        let component = inner
            .components
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| StoreError::ComponentNotFound(name.to_string()))?;
        component.status = Status {
            last_updated: Utc::now(),
            ..status
        };
        Ok(())
    }

    /// Append a line to the log buffer.
    ///
    /// A trailing newline is always added. Each call is atomic under the
    /// store's lock, so concurrent writers interleave only at whole-append
    /// granularity. When the buffer exceeds [`LOG_BUFFER_CEILING`] it is
    /// truncated from the front and prefixed with a truncation marker.
    pub fn add_logs(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        let mut inner = self.inner.write().expect("status store lock poisoned");
        inner.logs.push_str(line);
        if !line.ends_with('\n') {
            inner.logs.push('\n');
        }

        if inner.logs.len() > LOG_BUFFER_CEILING {
            let mut cut = inner.logs.len() - LOG_BUFFER_CEILING;
            while !inner.logs.is_char_boundary(cut) {
                cut += 1;
            }
            // Advance to the next line boundary so the buffer never starts
            // mid-line.
            if let Some(newline) = inner.logs[cut..].find('\n') {
                cut += newline + 1;
            }
            let mut logs = String::with_capacity(
                TRUNCATION_MARKER.len() + inner.logs.len() - cut,
            );
            logs.push_str(TRUNCATION_MARKER);
            logs.push_str(&inner.logs[cut..]);
            inner.logs = logs;
        }
    }

    /// Deep copy of the log buffer.
    pub fn get_logs(&self) -> String {
        let inner = self.inner.read().expect("status store lock poisoned");
        inner.logs.clone()
    }

    /// Clear status, components, and logs.
    ///
    /// Used at the start of each upgrade run; install runs never reset.
    pub fn reset(&self) {
        let mut inner = self.inner.write().expect("status store lock poisoned");
        *inner = Inner::default();
    }
}
