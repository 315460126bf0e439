//! Error types for the ledger.

use thiserror::Error;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An anchor id was re-registered with a different value
    #[error("Anchor {anchor_id} is immutable and already holds a different value")]
    ImmutabilityViolation { anchor_id: String },

    #[error("Anchor not found: {0}")]
    NotFound(String),

    /// An anchor points at a ledger sequence that does not exist
    #[error("Ledger entry {0} is missing")]
    MissingEntry(u64),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
