//! Error types returned by driver objects and backends.

use thiserror::Error;

/// Result of a synchronous driver operation.
pub type DriverResult<T = ()> = Result<T, DriverError>;

/// Failure of a synchronous driver operation.
///
/// Faults that happen while a non-blocking transfer is in flight are not
/// reported here; they surface as sticky error bits and events.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The direction is already carrying a transfer. Nothing was changed.
    #[error("peripheral busy")]
    Busy,
    /// The hardware rejected the request, or the instance is not initialized.
    #[error("operation failed")]
    Fail,
    /// A blocking operation ran out of time.
    #[error("operation timed out")]
    Timeout,
}

/// Failure reported by a backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The requested configuration cannot be programmed.
    #[error("configuration rejected")]
    Rejected,
    /// The peripheral reported a fault.
    #[error("hardware fault")]
    Hardware,
    /// The peripheral did not respond in time.
    #[error("hardware timeout")]
    Timeout,
}

impl From<BackendError> for DriverError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Timeout => DriverError::Timeout,
            BackendError::Rejected | BackendError::Hardware => DriverError::Fail,
        }
    }
}
