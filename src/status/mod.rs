//! Status model for installation and upgrade runs
//!
//! Everything a polling client can observe lives here: the closed state set,
//! per-component statuses, and the [`Infra`] aggregate returned by the store.
//! The aggregate is always handed out by value so readers can never observe a
//! write in progress.

mod store;

pub use store::{StatusStore, StoreError, LOG_BUFFER_CEILING};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the overall run or of a single component.
///
/// This is a closed set. An unrecognized value on the wire is a
/// deserialization error, never a silent default — callers must treat it as a
/// protocol violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    /// Registered but not yet started
    Pending,
    /// Work in progress
    Running,
    /// Terminal: completed successfully
    Succeeded,
    /// Terminal: failed, description carries the error text
    Failed,
}

impl State {
    /// Returns true for `Succeeded` and `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Succeeded | State::Failed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Pending => write!(f, "Pending"),
            State::Running => write!(f, "Running"),
            State::Succeeded => write!(f, "Succeeded"),
            State::Failed => write!(f, "Failed"),
        }
    }
}

/// Point-in-time status of the run or of one component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Current lifecycle state
    pub state: State,
    /// Human-readable progress string. Overwritable — always reflects only
    /// the latest message, it is not a log.
    pub description: String,
    /// Set by the store on every write, never by the caller
    pub last_updated: DateTime<Utc>,
}

impl Status {
    /// Build a status with the given state and description
    pub fn new(state: State, description: impl Into<String>) -> Self {
        Self {
            state,
            description: description.into(),
            last_updated: Utc::now(),
        }
    }

    /// A `Pending` status with an empty description
    pub fn pending() -> Self {
        Self::new(State::Pending, "")
    }

    /// A `Running` status with the given description
    pub fn running(description: impl Into<String>) -> Self {
        Self::new(State::Running, description)
    }

    /// A `Succeeded` status with the given description
    pub fn succeeded(description: impl Into<String>) -> Self {
        Self::new(State::Succeeded, description)
    }

    /// A `Failed` status carrying the error text
    pub fn failed(description: impl Into<String>) -> Self {
        Self::new(State::Failed, description)
    }
}

/// A named unit of work tracked with its own status within one run.
///
/// Membership is decided once, before the pipeline starts, and never changes
/// for the duration of the run — only the per-entry status is written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Stable name decided at registration time
    pub name: String,
    /// Latest status written for this component
    pub status: Status,
}

/// The externally observable aggregate for one installation or upgrade run.
///
/// Returned by value (a deep copy) on every read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Infra {
    /// Overall run status
    pub status: Status,
    /// Per-component statuses in registration order
    pub components: Vec<Component>,
    /// Bounded log buffer, most recent output always retained
    pub logs: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!State::Pending.is_terminal());
        assert!(!State::Running.is_terminal());
        assert!(State::Succeeded.is_terminal());
        assert!(State::Failed.is_terminal());
    }

    #[test]
    fn state_rejects_unknown_values() {
        // The state set is closed: an unknown value must fail to parse
        // rather than default to anything.
        let result: Result<State, _> = serde_json::from_str("\"Paused\"");
        assert!(result.is_err());

        let ok: State = serde_json::from_str("\"Running\"").unwrap();
        assert_eq!(ok, State::Running);
    }

    #[test]
    fn status_constructors_carry_description() {
        let status = Status::failed("addon exploded");
        assert_eq!(status.state, State::Failed);
        assert_eq!(status.description, "addon exploded");

        assert_eq!(Status::pending().state, State::Pending);
        assert!(Status::pending().description.is_empty());
    }
}
