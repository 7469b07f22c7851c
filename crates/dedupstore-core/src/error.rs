//! Error types for dedupstore.

use thiserror::Error;

/// Result type alias using dedupstore's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for dedupstore operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// File source failed its validity check (missing file, empty content, consumed stream)
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// Storage backend could not write or delete a blob
    #[error("Backend write failed: {0}")]
    BackendWrite(String),

    /// Operation not supported by the selected backend
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(e: crate::config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
