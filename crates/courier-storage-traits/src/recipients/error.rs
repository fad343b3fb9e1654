//! Error types for the recipients module

use thiserror::Error;

/// Recipient storage error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecipientError {
    /// Recipient was not found
    #[error("recipient not found")]
    NotFound,

    /// Invalid parameters
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(String),
}
