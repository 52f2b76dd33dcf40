//! Error types for buflist core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for buflist operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for buflist.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Buffer-related error
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Buffer-specific errors.
#[derive(Error, Debug)]
pub enum BufferError {
    /// Buffer is shutting down or already shut down
    #[error("Buffer is disposed")]
    Disposed,
}

/// Failure reported by a batch handler.
///
/// The whole batch is treated as failed and moved to the fault queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Whether this error reports an add against a disposed buffer.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Buffer(BufferError::Disposed))
    }
}
