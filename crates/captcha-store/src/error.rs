//! Store error types.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by persistence stores and the records built on them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A store call did not finish in time
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// Failed to open the database
    #[error("failed to open database: {0}")]
    Open(String),

    /// Migration execution failed
    #[error("migration failed: {0}")]
    Migration(String),

    /// A stored value could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Underlying `SQLx` error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
