//! Error types for the resend log module

use thiserror::Error;

/// Resend log storage error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResendLogError {
    /// Entry was not found
    #[error("resend log entry not found")]
    NotFound,

    /// Invalid parameters
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(String),
}
