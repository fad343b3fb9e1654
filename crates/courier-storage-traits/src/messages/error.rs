//! Error types for the messages module

use thiserror::Error;

/// Message storage error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Message was not found
    #[error("message not found")]
    NotFound,

    /// Invalid parameters
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(String),
}
