//! Pending retry receipts module
//!
//! When a decryption failure triggers a retry request to the sender, a
//! pending retry receipt row remembers the original receive time. If the
//! sender's resend later arrives, the row's timestamp is used for the
//! insert and the row is deleted.

use crate::ids::RecipientId;

pub mod error;
pub mod types;

use self::error::RetryReceiptError;
use self::types::PendingRetryReceipt;

/// Storage traits for pending retry receipts
pub trait RetryReceiptStorage {
    /// Record that a retry was requested for (author, sent timestamp)
    fn insert_pending_retry(
        &self,
        pending: PendingRetryReceipt,
    ) -> Result<(), RetryReceiptError>;

    /// Find the pending retry for (author, sent timestamp)
    fn find_pending_retry(
        &self,
        author: RecipientId,
        sent_timestamp_ms: u64,
    ) -> Result<Option<PendingRetryReceipt>, RetryReceiptError>;

    /// Delete the pending retry for (author, sent timestamp)
    fn delete_pending_retry(
        &self,
        author: RecipientId,
        sent_timestamp_ms: u64,
    ) -> Result<(), RetryReceiptError>;
}
