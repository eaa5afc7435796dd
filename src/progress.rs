//! Progress fan-in from the add-on installer
//!
//! The add-on installer emits one event per status change of each add-on it
//! manages. A single aggregator task drains those events into the status
//! store and keeps the overall description pointing at whichever add-on is
//! currently active, so a polling client gets a single "what's happening now"
//! string without diffing the component list.
//!
//! The stage that owns the sender closes the channel by dropping it — on
//! return or on unwind — which is what terminates the aggregator. No task
//! leak is possible.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::status::{State, Status, StatusStore};

/// One progress event from a sub-installer: the add-on's name and its new
/// status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOnProgress {
    /// Component name the event applies to
    pub name: String,
    /// New status for that component
    pub status: Status,
}

impl AddOnProgress {
    /// Convenience constructor
    pub fn new(name: impl Into<String>, status: Status) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

/// Spawn the aggregator task draining `rx` into `store`.
///
/// Every event is forwarded to the named component's status; `Running`
/// events additionally promote the overall description to
/// `"<event description> <event name>"`. Bookkeeping errors from the store
/// (an unregistered component, typically) are logged and dropped — they must
/// never abort installation of the other components.
///
/// The task ends when the sender side of the channel is dropped.
pub fn spawn_progress_aggregator(
    mut rx: UnboundedReceiver<AddOnProgress>,
    store: Arc<StatusStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let running = event.status.state == State::Running;
            let description = event.status.description.clone();

            if let Err(err) = store.set_component_status(&event.name, event.status) {
                warn!(
                    component = %event.name,
                    error = %err,
                    "failed to record progress event"
                );
            }

            if running {
                store.set_status(State::Running, format!("{} {}", description, event.name));
            }
        }
        debug!("progress channel closed, aggregator done");
    })
}
