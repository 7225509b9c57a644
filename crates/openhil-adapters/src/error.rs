//! Adapter and device error types.

use thiserror::Error;

/// Failures of the transport or device collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Adapter or device setup failed before the run could start.
    #[error("failed to connect to {target}: {reason}")]
    Connection { target: String, reason: String },

    /// A backend name the selector does not know.
    #[error("unknown adapter backend {0:?}")]
    UnknownBackend(String),

    /// A known backend that is not served by this process.
    #[error("adapter backend {0} is not supported by this build")]
    UnsupportedBackend(String),

    /// A task id the transport has no record of.
    #[error("no sending task with id {0}")]
    TaskNotFound(String),

    /// The device rejected an operation.
    #[error("device {device} rejected {operation}: {reason}")]
    Device {
        device: String,
        operation: String,
        reason: String,
    },

    /// The device did not answer in time.
    #[error("device {device} timed out after {timeout_ms}ms")]
    Timeout { device: String, timeout_ms: u64 },
}
