//! Memory-based implementation of the messages storage traits

use courier_storage_traits::messages::MessageStorage;
use courier_storage_traits::messages::error::MessageError;
use courier_storage_traits::messages::types::{MessageRecord, NewMessage, Reaction};
use courier_storage_traits::{MessageId, RecipientId, ThreadId};

use crate::MemoryStorage;

impl MessageStorage for MemoryStorage {
    fn insert_message(&self, message: NewMessage) -> Result<MessageId, MessageError> {
        let mut inner = self.inner.write();

        if !inner.threads.contains_key(&message.thread) {
            return Err(MessageError::InvalidParameters(
                "thread not found".to_string(),
            ));
        }

        let id = MessageId::new(inner.next_message_id);
        inner.next_message_id += 1;

        let thread = message.thread;
        let record = MessageRecord::from_new(id, message);

        // Evicted rows also disappear from the per-thread index
        if let Some((evicted_id, evicted)) = inner.messages.push(id, record) {
            if evicted_id != id {
                if let Some(ids) = inner.messages_by_thread.get_mut(&evicted.thread) {
                    ids.retain(|m| *m != evicted_id);
                }
                inner.reactions.remove(&evicted_id);
            }
        }

        inner.messages_by_thread.entry(thread).or_default().push(id);

        Ok(id)
    }

    fn find_message(&self, id: MessageId) -> Result<Option<MessageRecord>, MessageError> {
        Ok(self.inner.read().messages.peek(&id).cloned())
    }

    fn find_message_by_sent_timestamp(
        &self,
        author: RecipientId,
        sent_timestamp_ms: u64,
    ) -> Result<Option<MessageRecord>, MessageError> {
        let inner = self.inner.read();
        Ok(inner
            .messages
            .iter()
            .map(|(_, record)| record)
            .filter(|record| {
                record.sender == author && record.sent_timestamp_ms == sent_timestamp_ms
            })
            .max_by_key(|record| record.received_timestamp_ms)
            .cloned())
    }

    fn find_own_message_by_sent_timestamp(
        &self,
        sent_timestamp_ms: u64,
    ) -> Result<Option<MessageRecord>, MessageError> {
        let inner = self.inner.read();
        Ok(inner
            .messages
            .iter()
            .map(|(_, record)| record)
            .filter(|record| record.outgoing && record.sent_timestamp_ms == sent_timestamp_ms)
            .max_by_key(|record| record.received_timestamp_ms)
            .cloned())
    }

    fn messages_in_thread(&self, thread: ThreadId) -> Result<Vec<MessageRecord>, MessageError> {
        let inner = self.inner.read();
        let ids = match inner.messages_by_thread.get(&thread) {
            Some(ids) => ids,
            None => return Ok(Vec::new()),
        };

        Ok(ids
            .iter()
            .filter_map(|id| inner.messages.peek(id).cloned())
            .collect())
    }

    fn mark_delivered(
        &self,
        sent_timestamp_ms: u64,
        _by: RecipientId,
    ) -> Result<Option<MessageId>, MessageError> {
        let mut inner = self.inner.write();
        let matched = inner
            .messages
            .iter_mut()
            .map(|(_, record)| record)
            .find(|record| record.outgoing && record.sent_timestamp_ms == sent_timestamp_ms);

        Ok(matched.map(|record| {
            record.delivery_receipt_count += 1;
            record.id
        }))
    }

    fn mark_read(
        &self,
        sent_timestamp_ms: u64,
        _by: RecipientId,
    ) -> Result<Option<MessageId>, MessageError> {
        let mut inner = self.inner.write();
        let matched = inner
            .messages
            .iter_mut()
            .map(|(_, record)| record)
            .find(|record| record.outgoing && record.sent_timestamp_ms == sent_timestamp_ms);

        Ok(matched.map(|record| {
            record.read_receipt_count += 1;
            record.id
        }))
    }

    fn apply_reaction(&self, reaction: Reaction) -> Result<(), MessageError> {
        let mut inner = self.inner.write();

        if inner.messages.peek(&reaction.message).is_none() {
            return Err(MessageError::NotFound);
        }

        let reactions = inner.reactions.entry(reaction.message).or_default();

        // One reaction per author; a new one replaces, a remove clears
        reactions.retain(|r| r.author != reaction.author);
        if !reaction.remove {
            reactions.push(reaction);
        }

        Ok(())
    }

    fn reactions_for(&self, message: MessageId) -> Result<Vec<Reaction>, MessageError> {
        Ok(self
            .inner
            .read()
            .reactions
            .get(&message)
            .cloned()
            .unwrap_or_default())
    }

    fn mark_remotely_deleted(&self, id: MessageId) -> Result<(), MessageError> {
        let mut inner = self.inner.write();
        let record = inner.messages.get_mut(&id).ok_or(MessageError::NotFound)?;
        record.remotely_deleted = true;
        record.body = None;
        inner.reactions.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use courier_storage_traits::messages::types::MessageKind;
    use courier_storage_traits::recipients::RecipientStorage;
    use courier_storage_traits::threads::ThreadStorage;
    use courier_storage_traits::{DeviceId, ServiceId};

    use super::*;

    fn setup() -> (MemoryStorage, RecipientId, ThreadId) {
        let storage = MemoryStorage::default();
        let sender = storage
            .resolve_service_id(&ServiceId::from_bytes([1u8; 16]))
            .unwrap();
        let thread = storage.get_or_create_thread(sender.id).unwrap();
        (storage, sender.id, thread)
    }

    fn new_message(sender: RecipientId, thread: ThreadId, sent_ms: u64) -> NewMessage {
        NewMessage {
            thread,
            sender,
            sender_device: DeviceId::PRIMARY,
            sent_timestamp_ms: sent_ms,
            server_timestamp_ms: sent_ms + 1,
            received_timestamp_ms: sent_ms + 2,
            kind: MessageKind::Text,
            body: Some("hi".to_string()),
            attachment_count: 0,
            expires_in_ms: None,
            outgoing: false,
        }
    }

    #[test]
    fn test_insert_and_find_by_timestamp() {
        let (storage, sender, thread) = setup();

        let id = storage
            .insert_message(new_message(sender, thread, 1000))
            .unwrap();

        let found = storage
            .find_message_by_sent_timestamp(sender, 1000)
            .unwrap()
            .expect("message should be found");
        assert_eq!(found.id, id);

        assert!(storage
            .find_message_by_sent_timestamp(sender, 2000)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_insert_requires_thread() {
        let storage = MemoryStorage::default();
        let result = storage.insert_message(new_message(
            RecipientId::new(1),
            ThreadId::new(99),
            1000,
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_receipt_counters_only_match_outgoing() {
        let (storage, sender, thread) = setup();

        storage
            .insert_message(new_message(sender, thread, 1000))
            .unwrap();

        // Incoming message: receipts must not match it
        assert!(storage.mark_delivered(1000, sender).unwrap().is_none());

        let mut outgoing = new_message(sender, thread, 2000);
        outgoing.outgoing = true;
        let id = storage.insert_message(outgoing).unwrap();

        assert_eq!(storage.mark_delivered(2000, sender).unwrap(), Some(id));
        assert_eq!(storage.mark_read(2000, sender).unwrap(), Some(id));

        let record = storage.find_message(id).unwrap().unwrap();
        assert_eq!(record.delivery_receipt_count, 1);
        assert_eq!(record.read_receipt_count, 1);
    }

    #[test]
    fn test_reaction_replaces_previous() {
        let (storage, sender, thread) = setup();
        let id = storage
            .insert_message(new_message(sender, thread, 1000))
            .unwrap();

        let reaction = |emoji: &str, remove: bool| Reaction {
            message: id,
            author: sender,
            emoji: emoji.to_string(),
            sent_timestamp_ms: 1500,
            remove,
        };

        storage.apply_reaction(reaction("a", false)).unwrap();
        storage.apply_reaction(reaction("b", false)).unwrap();

        let reactions = storage.reactions_for(id).unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "b");

        storage.apply_reaction(reaction("b", true)).unwrap();
        assert!(storage.reactions_for(id).unwrap().is_empty());
    }

    #[test]
    fn test_remote_delete_clears_body() {
        let (storage, sender, thread) = setup();
        let id = storage
            .insert_message(new_message(sender, thread, 1000))
            .unwrap();

        storage.mark_remotely_deleted(id).unwrap();

        let record = storage.find_message(id).unwrap().unwrap();
        assert!(record.remotely_deleted);
        assert!(record.body.is_none());
    }
}
