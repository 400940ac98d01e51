//! Error types for fable-core

use thiserror::Error;

/// Result type alias using fable-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fable-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote store error (push or pull)
    #[error("Remote store error: {0}")]
    Remote(String),

    /// No network available; sync was skipped
    #[error("No network available")]
    Offline,
}
