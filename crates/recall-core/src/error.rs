//! Error types for recall-core

use thiserror::Error;

/// Result type alias using recall-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in recall-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local store failure outside SQLite's own error type
    #[error("Store error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

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

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote provider rejected or failed an operation
    #[error("Provider error: {0}")]
    Provider(String),

    /// The operation requires a configured remote provider
    #[error("Sync provider is not configured")]
    ProviderNotConfigured,
}
