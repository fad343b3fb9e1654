//! Pipeline errors

use courier_storage_traits::CourierStorageError;
use courier_storage_traits::groups::error::GroupError;
use courier_storage_traits::messages::error::MessageError;
use courier_storage_traits::protocol::error::ProtocolError;
use courier_storage_traits::recipients::error::RecipientError;
use courier_storage_traits::resend_log::error::ResendLogError;
use courier_storage_traits::retry_receipts::error::RetryReceiptError;
use courier_storage_traits::threads::error::ThreadError;

use crate::transport::TransportError;

/// Pipeline error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Storage error
    #[error(transparent)]
    Storage(#[from] CourierStorageError),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The operation was deliberately canceled.
    ///
    /// Distinct from ordinary failure so callers don't treat a cancel as a
    /// delivery failure.
    #[error("send canceled")]
    Canceled,

    /// A group id on the wire could not be understood
    #[error("bad group id: {0}")]
    BadGroupId(String),

    /// Group error
    #[error("{0}")]
    Group(String),

    /// Message error
    #[error("{0}")]
    Message(String),
}

impl From<RecipientError> for Error {
    fn from(e: RecipientError) -> Self {
        Self::Storage(e.into())
    }
}

impl From<MessageError> for Error {
    fn from(e: MessageError) -> Self {
        Self::Storage(e.into())
    }
}

impl From<GroupError> for Error {
    fn from(e: GroupError) -> Self {
        Self::Storage(e.into())
    }
}

impl From<ThreadError> for Error {
    fn from(e: ThreadError) -> Self {
        Self::Storage(e.into())
    }
}

impl From<ResendLogError> for Error {
    fn from(e: ResendLogError) -> Self {
        Self::Storage(e.into())
    }
}

impl From<RetryReceiptError> for Error {
    fn from(e: RetryReceiptError) -> Self {
        Self::Storage(e.into())
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Storage(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::Canceled.to_string(), "send canceled");
        assert_eq!(
            Error::BadGroupId("deadbeef".to_string()).to_string(),
            "bad group id: deadbeef"
        );
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: Error = RecipientError::NotFound.into();
        assert!(matches!(err, Error::Storage(_)));
        assert!(err.to_string().contains("recipient not found"));
    }
}
