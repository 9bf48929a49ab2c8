//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored bytes could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A record the operation depends on does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Data rejected before write, or corrupt on read.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The write would replace a user's registered public key.
    #[error("key conflict: {0}")]
    KeyConflict(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Lock poisoning or a failed blocking task.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
