//! Error types for aegis-resonance.

use thiserror::Error;

/// Result type for resonance operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while tracking resonance.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// A sample was NaN or infinite.
    #[error("non-finite stability sample: {0}")]
    NonFiniteSample(f64),

    /// Window parameters are unusable.
    #[error("invalid window configuration: {0}")]
    InvalidConfig(String),
}
