//! Custom error types for the crate.
//!
//! This module defines the primary error type, `DaqError`, used by every layer of
//! `vision_daq`. Using the `thiserror` crate, it provides a centralized and
//! consistent way to report failures, from configuration problems to device-level
//! faults reported while tunnelling serial data or recycling frame buffers.
//!
//! ## Error Hierarchy
//!
//! `DaqError` groups failures into three broad categories:
//!
//! - **Device errors**: `DeviceUnavailable`, `FeatureNotFound`, `ProtocolError`.
//!   The camera is gone, or does not expose a node this crate depends on. These
//!   are usually fatal for the session.
//! - **Operation errors**: `BufferFault`, `OperationTimeout`, `OperationFailed`,
//!   `CapacityExceeded`. A single transfer or file operation failed. Buffer
//!   faults and timeouts are transient and may simply be retried.
//! - **Contract errors**: `InvalidState`, `LoanViolation`, `OutstandingLoans`,
//!   `UnsupportedValue`, `Configuration`. The caller used an API out of order or
//!   asked for a value with no device-level equivalent.
//!
//! Every error carries a human-readable message via `Display`; callers decide
//! whether a failure is fatal using [`DaqError::is_recoverable`].

use std::time::Duration;

use thiserror::Error;

use crate::hardware::capabilities::{BufferHandle, BufferStatus};

/// Convenience alias for results using the crate error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for camera, stream and file-access operations.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The connection or stream to the device could not be created or was lost.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A required named feature or register is absent on this device model.
    #[error("Feature '{0}' not found on device")]
    FeatureNotFound(String),

    /// A delivered frame failed the hardware integrity status.
    #[error("Buffer {handle} delivered with status {status}")]
    BufferFault {
        /// Driver handle of the faulted buffer.
        handle: BufferHandle,
        /// Status reported by the driver.
        status: BufferStatus,
    },

    /// A status poll or frame wait exceeded its configured bound.
    #[error("{operation} did not complete within {waited:?}")]
    OperationTimeout {
        /// Operation that was being waited on.
        operation: String,
        /// Time spent waiting before giving up.
        waited: Duration,
    },

    /// A file operation reached a terminal status other than "Success".
    #[error("{operation} finished with status '{status}'")]
    OperationFailed {
        /// Operation that was executed.
        operation: String,
        /// Raw status string reported by the device.
        status: String,
    },

    /// Payload larger than a fixed register can hold.
    #[error("Payload of {requested} bytes exceeds register capacity of {capacity} bytes")]
    CapacityExceeded {
        /// Number of bytes the caller asked to transfer.
        requested: usize,
        /// Register capacity in bytes.
        capacity: usize,
    },

    /// Unexpected device response, missing register node or malformed packet.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A requested configuration value has no device-level equivalent.
    #[error("Unsupported {kind} value '{value}'")]
    UnsupportedValue {
        /// Name of the value domain (e.g. "pixel format").
        kind: &'static str,
        /// The rejected value.
        value: String,
    },

    /// An operation was attempted in a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A buffer was released that is not currently on loan.
    #[error("Buffer {0} is not on loan")]
    LoanViolation(BufferHandle),

    /// Teardown was attempted while frames were still on loan.
    #[error("{0} frame(s) still on loan at teardown")]
    OutstandingLoans(usize),

    /// Configuration could not be loaded or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// One or more teardown steps failed.
    #[error("Shutdown failed: {}", join_errors(.0))]
    ShutdownFailed(Vec<DaqError>),
}

impl DaqError {
    /// Whether the failure is transient and the operation may simply be retried.
    ///
    /// A faulted frame or an expired wait does not invalidate the session; device
    /// loss, missing features and contract violations do.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            DaqError::BufferFault { .. }
            | DaqError::OperationTimeout { .. }
            | DaqError::OperationFailed { .. }
            | DaqError::CapacityExceeded { .. } => true,
            DaqError::ShutdownFailed(errors) => errors.iter().all(DaqError::is_recoverable),
            _ => false,
        }
    }
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

fn join_errors(errors: &[DaqError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
