//! Memory-based implementation of the threads storage traits

use courier_storage_traits::threads::ThreadStorage;
use courier_storage_traits::threads::error::ThreadError;
use courier_storage_traits::{RecipientId, ThreadId};

use crate::{MemoryStorage, ThreadRow};

impl ThreadStorage for MemoryStorage {
    fn thread_for_recipient(
        &self,
        recipient: RecipientId,
    ) -> Result<Option<ThreadId>, ThreadError> {
        Ok(self.inner.read().threads_by_recipient.get(&recipient).copied())
    }

    fn get_or_create_thread(&self, recipient: RecipientId) -> Result<ThreadId, ThreadError> {
        let mut inner = self.inner.write();

        if let Some(thread) = inner.threads_by_recipient.get(&recipient).copied() {
            return Ok(thread);
        }

        let thread = ThreadId::new(inner.next_thread_id);
        inner.next_thread_id += 1;

        inner.threads.insert(
            thread,
            ThreadRow {
                recipient,
                last_seen_ms: None,
            },
        );
        inner.threads_by_recipient.insert(recipient, thread);

        Ok(thread)
    }

    fn thread_recipient(&self, thread: ThreadId) -> Result<Option<RecipientId>, ThreadError> {
        Ok(self.inner.read().threads.get(&thread).map(|row| row.recipient))
    }

    fn last_seen(&self, thread: ThreadId) -> Result<Option<u64>, ThreadError> {
        self.inner
            .read()
            .threads
            .get(&thread)
            .map(|row| row.last_seen_ms)
            .ok_or(ThreadError::NotFound)
    }

    fn set_last_seen(&self, thread: ThreadId, timestamp_ms: u64) -> Result<(), ThreadError> {
        let mut inner = self.inner.write();
        let row = inner.threads.get_mut(&thread).ok_or(ThreadError::NotFound)?;
        row.last_seen_ms = Some(timestamp_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let storage = MemoryStorage::default();
        let recipient = RecipientId::new(42);

        assert!(storage.thread_for_recipient(recipient).unwrap().is_none());

        let first = storage.get_or_create_thread(recipient).unwrap();
        let second = storage.get_or_create_thread(recipient).unwrap();
        assert_eq!(first, second);

        assert_eq!(storage.thread_recipient(first).unwrap(), Some(recipient));
    }

    #[test]
    fn test_last_seen() {
        let storage = MemoryStorage::default();
        let thread = storage.get_or_create_thread(RecipientId::new(1)).unwrap();

        assert_eq!(storage.last_seen(thread).unwrap(), None);
        storage.set_last_seen(thread, 12345).unwrap();
        assert_eq!(storage.last_seen(thread).unwrap(), Some(12345));

        assert!(storage.last_seen(ThreadId::new(99)).is_err());
    }
}
