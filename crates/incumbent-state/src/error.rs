//! Error types for lease store operations.

use thiserror::Error;

/// Result type alias for lease store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing a lease record.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open lease store: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("version conflict on {key}: expected {expected:?}, found {actual:?}")]
    Conflict {
        key: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("lease store unavailable: {0}")]
    Unavailable(String),

    #[error("lease store call timed out")]
    Timeout,

    #[error("invalid lease key: {0}")]
    InvalidKey(String),
}

impl StoreError {
    /// Another writer got there first. Expected under contention.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Worth retrying on the next tick (network, timeout, I/O).
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            StoreError::Conflict { .. }
                | StoreError::InvalidKey(_)
                | StoreError::Serialize(_)
                | StoreError::Deserialize(_)
        )
    }
}
