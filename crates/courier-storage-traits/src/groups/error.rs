//! Error types for the groups module

use thiserror::Error;

/// Group storage error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    /// Group was not found
    #[error("group not found")]
    NotFound,

    /// Invalid parameters
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(String),
}
