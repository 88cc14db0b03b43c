//! Storage errors.

use thiserror::Error;

/// Errors returned by storage implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Referenced entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Write would violate a monotonicity or ownership rule
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend failure (disk, transaction, lock)
    #[error("storage I/O failure: {0}")]
    Io(String),

    /// Stored bytes could not be encoded or decoded
    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Failures that may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
