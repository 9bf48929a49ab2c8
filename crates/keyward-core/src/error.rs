//! Error types for Keyward Core.

use thiserror::Error;

/// Errors raised while parsing or validating core types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("unknown resource kind: {0}")]
    UnknownResourceKind(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
