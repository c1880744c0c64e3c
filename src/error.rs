//! Error types for Sluice.

use thiserror::Error;

/// Main error type for Sluice operations.
#[derive(Error, Debug)]
pub enum SluiceError {
    /// Invalid or incomplete rate limit configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request was cancelled by its caller before it was admitted
    #[error("Request cancelled before admission")]
    Cancelled,

    /// The rate limiter was dropped while the request was still queued
    #[error("Rate limiter closed before the request was admitted")]
    Closed,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SluiceError {
    /// Whether this error reports a caller-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SluiceError::Cancelled)
    }
}

/// Result type alias for Sluice operations.
pub type Result<T> = std::result::Result<T, SluiceError>;
