//! Error types for the pending retry receipts module

use thiserror::Error;

/// Pending retry receipt storage error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryReceiptError {
    /// Pending retry was not found
    #[error("pending retry receipt not found")]
    NotFound,

    /// Invalid parameters
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(String),
}
