//! Error types for vestry-core

use thiserror::Error;

/// Result type alias using vestry-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in vestry-core operations
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

    /// Record or task not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No type handler registered for an entity kind
    #[error("No handler registered for kind: {0}")]
    NoHandler(String),

    /// A type handler signalled a retryable failure
    #[error("Handler failed: {0}")]
    Handler(String),

    /// Request rejected by the trailing-window rate limiter
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the oldest counted request leaves the window
        retry_after_secs: u64,
    },

    /// Notification delivery transport error
    #[error("Delivery error: {0}")]
    Delivery(String),
}
