//! Error types for the node.

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can stop a node from starting or serving.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad configuration value or file
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Peer error: {0}")]
    Peers(#[from] aegis_peers::Error),

    #[error("Resonance error: {0}")]
    Resonance(#[from] aegis_resonance::Error),

    #[error("Governor error: {0}")]
    Governor(#[from] aegis_governor::Error),

    #[error("Backpressure error: {0}")]
    Backpressure(#[from] aegis_backpressure::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] aegis_ledger::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
