//! Error types for the store module.

use tether_core::SyncCursor;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Session serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A save would move the persisted cursor backwards.
    #[error("stale session: persisted cursor {persisted}, attempted {attempted}")]
    StaleCursor {
        persisted: SyncCursor,
        attempted: SyncCursor,
    },

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A blocking task failed to complete.
    #[error("blocking task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Task(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
