//! Messages module
//!
//! This module defines the storage surface for durably stored messages:
//! inserts (including error placeholders), lookup by the (author, sent
//! timestamp) key that reactions/receipts/remote-deletes reference, reaction
//! rows, and delivery/read receipt counters.

use crate::ids::{MessageId, RecipientId, ThreadId};

pub mod error;
pub mod types;

use self::error::MessageError;
use self::types::*;

/// Storage traits for the messages module
pub trait MessageStorage {
    /// Insert a message row, returning its newly assigned id
    fn insert_message(&self, message: NewMessage) -> Result<MessageId, MessageError>;

    /// Find a message by id
    fn find_message(&self, id: MessageId) -> Result<Option<MessageRecord>, MessageError>;

    /// Find an incoming message by its author and client-sent timestamp.
    ///
    /// This is the lookup used by reactions, remote-deletes, and story
    /// replies to locate their target.
    fn find_message_by_sent_timestamp(
        &self,
        author: RecipientId,
        sent_timestamp_ms: u64,
    ) -> Result<Option<MessageRecord>, MessageError>;

    /// Find the most recent self-authored message with the given sent
    /// timestamp. Used to resolve retry receipts that have no resend log
    /// entry.
    fn find_own_message_by_sent_timestamp(
        &self,
        sent_timestamp_ms: u64,
    ) -> Result<Option<MessageRecord>, MessageError>;

    /// All messages in a thread, in insertion order
    fn messages_in_thread(&self, thread: ThreadId) -> Result<Vec<MessageRecord>, MessageError>;

    /// Record a delivery receipt for the self-authored message sent at the
    /// given timestamp. Returns the message id when a message matched.
    fn mark_delivered(
        &self,
        sent_timestamp_ms: u64,
        by: RecipientId,
    ) -> Result<Option<MessageId>, MessageError>;

    /// Record a read receipt for the self-authored message sent at the given
    /// timestamp. Returns the message id when a message matched.
    fn mark_read(
        &self,
        sent_timestamp_ms: u64,
        by: RecipientId,
    ) -> Result<Option<MessageId>, MessageError>;

    /// Apply a reaction to a stored message
    fn apply_reaction(&self, reaction: Reaction) -> Result<(), MessageError>;

    /// All reactions applied to a message
    fn reactions_for(&self, message: MessageId) -> Result<Vec<Reaction>, MessageError>;

    /// Mark a message as remotely deleted, clearing its body
    fn mark_remotely_deleted(&self, id: MessageId) -> Result<(), MessageError>;
}
