//! Error types for the drydock orchestrator
//!
//! Precondition errors (`AlreadyInstalled`, `InstallAlreadyStarted`) are
//! returned synchronously from submission and never enter the status store.
//! Stage errors and recovered panics are wrapped with the failing stage's
//! name and become the run's terminal status. Store bookkeeping errors are
//! logged by the pipeline, never propagated.

use thiserror::Error;

use crate::status::StoreError;

/// Main error type for drydock operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The runtime is already present on this host. User-actionable: the node
    /// must be reset before a new installation is attempted.
    #[error("runtime is already installed on this host: reset the node before reinstalling")]
    AlreadyInstalled,

    /// A second install was submitted to the same orchestrator instance
    #[error("install can only be run once: an installation has already been started by this process")]
    InstallAlreadyStarted,

    /// A pipeline stage failed; terminal for the run
    #[error("{stage}: {message}")]
    Stage {
        /// Name of the stage that failed
        stage: String,
        /// Error text from the underlying operation
        message: String,
    },

    /// A panic recovered from a pipeline stage, converted to an error
    /// carrying the panic payload and a captured backtrace
    #[error("{stage} panicked: {message}")]
    Panic {
        /// Name of the stage that panicked
        stage: String,
        /// Panic payload plus backtrace
        message: String,
    },

    /// Status store bookkeeping error
    #[error("status store error: {0}")]
    Store(#[from] StoreError),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// An external command failed
    #[error("command failed: {command}: {message}")]
    Command {
        /// The command that failed
        command: String,
        /// Captured stderr or spawn error
        message: String,
    },

    /// Invalid or unusable configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// The deadline that was exceeded
        seconds: u64,
    },

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a stage failure with the stage's name for diagnosis
    pub fn stage(stage: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: source.to_string(),
        }
    }

    /// Convert a recovered panic into an error
    pub fn panic(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Panic {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create a command error from the command line and its stderr
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a timeout error for the named operation
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds: timeout.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_errors_carry_remediation_text() {
        // These two are shown to the end user directly, so they must read as
        // instructions rather than diagnostics.
        let err = Error::AlreadyInstalled;
        assert!(err.to_string().contains("reset the node"));

        let err = Error::InstallAlreadyStarted;
        assert!(err.to_string().contains("once"));
    }

    #[test]
    fn stage_errors_name_the_stage() {
        let err = Error::stage("Runtime", "k0s install exited with status 1");
        assert!(err.to_string().starts_with("Runtime:"));
        assert!(err.to_string().contains("status 1"));
    }

    #[test]
    fn panic_errors_keep_the_payload() {
        let err = Error::panic("Admin Console", "index out of bounds");
        assert!(err.to_string().contains("panicked"));
        assert!(err.to_string().contains("index out of bounds"));
    }

    #[test]
    fn store_errors_convert() {
        let err: Error = StoreError::ComponentNotFound("Ghost".into()).into();
        assert!(err.to_string().contains("Ghost"));
    }
}
