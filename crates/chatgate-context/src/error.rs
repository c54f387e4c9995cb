//! Error types for context handling

use thiserror::Error;

/// Context handling error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid message role: {0}")]
    InvalidRole(String),

    #[error("Token counting error: {0}")]
    TokenCountError(String),
}

/// Result type for context operations
pub type ContextResult<T> = Result<T, ContextError>;
