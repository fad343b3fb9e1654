//! Error types for the protocol store module

use thiserror::Error;

/// Protocol store error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// No session exists for the address
    #[error("no session for address")]
    NoSession,

    /// Invalid parameters
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(String),
}
