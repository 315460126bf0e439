//! Error types for aegis-governor.

use thiserror::Error;

/// Result type for governor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when building a governor.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// Configuration is out of range or inconsistent.
    #[error("invalid governor configuration: {0}")]
    InvalidConfig(String),
}
