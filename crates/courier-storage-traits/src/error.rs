//! Error types for courier storage operations

use thiserror::Error;

use crate::groups::error::GroupError;
use crate::messages::error::MessageError;
use crate::protocol::error::ProtocolError;
use crate::recipients::error::RecipientError;
use crate::resend_log::error::ResendLogError;
use crate::retry_receipts::error::RetryReceiptError;
use crate::threads::error::ThreadError;

/// Error type unifying every storage module.
///
/// The pipeline core propagates this from any storage call; the per-module
/// errors convert into it so a single `?` works across module boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CourierStorageError {
    /// Recipient storage error
    #[error(transparent)]
    Recipient(#[from] RecipientError),

    /// Message storage error
    #[error(transparent)]
    Message(#[from] MessageError),

    /// Group storage error
    #[error(transparent)]
    Group(#[from] GroupError),

    /// Thread storage error
    #[error(transparent)]
    Thread(#[from] ThreadError),

    /// Resend log storage error
    #[error(transparent)]
    ResendLog(#[from] ResendLogError),

    /// Pending retry receipt storage error
    #[error(transparent)]
    RetryReceipt(#[from] RetryReceiptError),

    /// Protocol store error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(String),

    /// Other error
    #[error("error: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = CourierStorageError::Database("connection failed".to_string());
        assert_eq!(err.to_string(), "database error: connection failed");

        let err = CourierStorageError::Other("unexpected".to_string());
        assert_eq!(err.to_string(), "error: unexpected");
    }

    #[test]
    fn test_module_error_conversion() {
        let err: CourierStorageError = RecipientError::NotFound.into();
        assert!(matches!(err, CourierStorageError::Recipient(_)));

        let err: CourierStorageError =
            MessageError::InvalidParameters("bad timestamp".to_string()).into();
        assert!(matches!(err, CourierStorageError::Message(_)));
    }
}
