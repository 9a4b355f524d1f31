//! Storage error types
//!
//! Corruption is the only storage failure that callers must treat as fatal;
//! everything else is an ordinary I/O or encoding failure.

use std::io;

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Local store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Disk I/O failure
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    /// Value could not be encoded or decoded
    #[error("store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Store contents failed checksum verification
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// Store is not accepting requests (injected or unreachable backend)
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Corruption requires operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Corrupted(_))
    }
}
