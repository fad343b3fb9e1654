//! Memory-based implementation of the pending retry receipt storage traits

use courier_storage_traits::RecipientId;
use courier_storage_traits::retry_receipts::RetryReceiptStorage;
use courier_storage_traits::retry_receipts::error::RetryReceiptError;
use courier_storage_traits::retry_receipts::types::PendingRetryReceipt;

use crate::MemoryStorage;

impl RetryReceiptStorage for MemoryStorage {
    fn insert_pending_retry(
        &self,
        pending: PendingRetryReceipt,
    ) -> Result<(), RetryReceiptError> {
        self.inner
            .write()
            .pending_retries
            .insert((pending.author, pending.sent_timestamp_ms), pending);
        Ok(())
    }

    fn find_pending_retry(
        &self,
        author: RecipientId,
        sent_timestamp_ms: u64,
    ) -> Result<Option<PendingRetryReceipt>, RetryReceiptError> {
        Ok(self
            .inner
            .read()
            .pending_retries
            .get(&(author, sent_timestamp_ms))
            .cloned())
    }

    fn delete_pending_retry(
        &self,
        author: RecipientId,
        sent_timestamp_ms: u64,
    ) -> Result<(), RetryReceiptError> {
        self.inner
            .write()
            .pending_retries
            .remove(&(author, sent_timestamp_ms));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use courier_storage_traits::{DeviceId, ThreadId};

    use super::*;

    #[test]
    fn test_pending_retry_lifecycle() {
        let storage = MemoryStorage::default();
        let author = RecipientId::new(7);

        let pending = PendingRetryReceipt {
            author,
            device: DeviceId::PRIMARY,
            sent_timestamp_ms: 1000,
            received_timestamp_ms: 1100,
            thread: ThreadId::new(1),
        };

        storage.insert_pending_retry(pending.clone()).unwrap();
        assert_eq!(
            storage.find_pending_retry(author, 1000).unwrap(),
            Some(pending)
        );

        storage.delete_pending_retry(author, 1000).unwrap();
        assert!(storage.find_pending_retry(author, 1000).unwrap().is_none());
    }
}
