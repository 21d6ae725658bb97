//! Error types for picking.

use thiserror::Error;

/// Result type for picker operations.
pub type PickResult<T> = Result<T, PickError>;

/// Errors returned by a picker snapshot.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickError {
    /// No ready connection exists to serve the call.
    #[error("no available backend")]
    NoAvailableBackend,
}
