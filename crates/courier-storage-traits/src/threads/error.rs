//! Error types for the threads module

use thiserror::Error;

/// Thread storage error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadError {
    /// Thread was not found
    #[error("thread not found")]
    NotFound,

    /// Invalid parameters
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(String),
}
