//! Error types for aegis-peers.

use std::time::Duration;

use thiserror::Error;

/// Result type for peer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to peers.
///
/// None of these are fatal to the node: the synchronizer turns every one of
/// them into a backoff step.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer could not be reached.
    #[error("peer {address} unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    /// The peer did not answer within the sync timeout.
    #[error("peer {address} timed out after {after:?}")]
    Timeout { address: String, after: Duration },

    /// The peer answered with something we do not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
