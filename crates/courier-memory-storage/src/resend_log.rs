//! Memory-based implementation of the resend log storage traits

use courier_storage_traits::resend_log::MessageLogStorage;
use courier_storage_traits::resend_log::error::ResendLogError;
use courier_storage_traits::resend_log::types::{LogEntryId, MessageLogEntry, NewLogEntry};
use courier_storage_traits::{DeviceId, RecipientId};

use crate::MemoryStorage;

impl MessageLogStorage for MemoryStorage {
    fn insert_log_entry(&self, entry: NewLogEntry) -> Result<LogEntryId, ResendLogError> {
        let mut inner = self.inner.write();

        let id = LogEntryId::new(inner.next_log_entry_id);
        inner.next_log_entry_id += 1;

        inner
            .log_entries
            .insert(id, MessageLogEntry::from_new(id, entry));

        Ok(id)
    }

    fn append_log_recipient(
        &self,
        entry: LogEntryId,
        recipient: RecipientId,
        device: DeviceId,
    ) -> Result<LogEntryId, ResendLogError> {
        let mut inner = self.inner.write();
        let stored = inner
            .log_entries
            .get_mut(&entry)
            .ok_or(ResendLogError::NotFound)?;

        if !stored.recipients.contains(&(recipient, device)) {
            stored.recipients.push((recipient, device));
        }

        Ok(entry)
    }

    fn find_log_entry(
        &self,
        recipient: RecipientId,
        device: DeviceId,
        sent_timestamp_ms: u64,
    ) -> Result<Option<MessageLogEntry>, ResendLogError> {
        let inner = self.inner.read();
        Ok(inner
            .log_entries
            .values()
            .find(|entry| {
                entry.sent_timestamp_ms == sent_timestamp_ms
                    && entry.recipients.contains(&(recipient, device))
            })
            .cloned())
    }

    fn prune_log_for_receipt(
        &self,
        recipient: RecipientId,
        sent_timestamp_ms: u64,
    ) -> Result<(), ResendLogError> {
        let mut inner = self.inner.write();

        for entry in inner.log_entries.values_mut() {
            if entry.sent_timestamp_ms == sent_timestamp_ms {
                entry.recipients.retain(|(r, _)| *r != recipient);
            }
        }

        inner.log_entries.retain(|_, entry| !entry.recipients.is_empty());

        Ok(())
    }
}
