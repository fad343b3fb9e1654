//! Memory-based storage implementation for the courier pipeline.
//!
//! This crate provides an in-memory implementation of the
//! `CourierStorageProvider` trait. It is non-persistent and will be cleared
//! when the process terminates, which makes it the backend of choice for
//! tests and ephemeral deployments.
//!
//! All state lives behind a single `parking_lot::RwLock`, so the backend is
//! safe to share across the pipeline's worker threads. The message cache is
//! bounded with an LRU so a single hot conversation cannot grow memory
//! without limit.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::RwLock;

use courier_storage_traits::groups::types::Group;
use courier_storage_traits::messages::types::{MessageRecord, Reaction};
use courier_storage_traits::recipients::types::{Recipient, RegistrationState};
use courier_storage_traits::resend_log::types::{LogEntryId, MessageLogEntry};
use courier_storage_traits::retry_receipts::types::PendingRetryReceipt;
use courier_storage_traits::protocol::types::{IdentityKey, SessionRecord};
use courier_storage_traits::{
    Backend, CourierStorageProvider, DistributionId, GroupId, MessageId, ProtocolAddress,
    RecipientId, ServiceId, ThreadId,
};

mod groups;
mod messages;
mod protocol;
mod recipients;
mod resend_log;
mod retry_receipts;
mod threads;

/// Default bound for the message cache
const DEFAULT_MESSAGE_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(10_000) {
    Some(v) => v,
    None => panic!("cache size must be non-zero"),
};

pub(crate) struct ThreadRow {
    pub recipient: RecipientId,
    pub last_seen_ms: Option<u64>,
}

pub(crate) struct Inner {
    // Recipients
    pub recipients: HashMap<RecipientId, Recipient>,
    pub recipients_by_service_id: HashMap<ServiceId, RecipientId>,
    pub next_recipient_id: u64,
    pub self_recipient: RecipientId,

    // Messages
    pub messages: LruCache<MessageId, MessageRecord>,
    pub messages_by_thread: HashMap<ThreadId, Vec<MessageId>>,
    pub reactions: HashMap<MessageId, Vec<Reaction>>,
    pub next_message_id: u64,

    // Groups
    pub groups: HashMap<GroupId, Group>,
    pub next_distribution_seed: u64,

    // Threads
    pub threads: HashMap<ThreadId, ThreadRow>,
    pub threads_by_recipient: HashMap<RecipientId, ThreadId>,
    pub next_thread_id: u64,

    // Resend log
    pub log_entries: HashMap<LogEntryId, MessageLogEntry>,
    pub next_log_entry_id: u64,

    // Pending retry receipts, keyed by (author, sent timestamp)
    pub pending_retries: HashMap<(RecipientId, u64), PendingRetryReceipt>,

    // Protocol store
    pub sessions: HashMap<ProtocolAddress, SessionRecord>,
    pub identities: HashMap<ProtocolAddress, IdentityKey>,
    pub sender_key_distributions: HashMap<ProtocolAddress, Vec<Vec<u8>>>,
    pub sender_key_create_times: HashMap<DistributionId, u64>,
    pub sender_key_shared: HashMap<DistributionId, BTreeSet<ProtocolAddress>>,
}

/// In-memory storage backend.
///
/// Construct with [`MemoryStorage::new`], passing the local account's
/// service id; a self recipient row is created up front so that
/// [`courier_storage_traits::recipients::RecipientStorage::self_recipient`]
/// always resolves.
pub struct MemoryStorage {
    pub(crate) inner: RwLock<Inner>,
}

impl MemoryStorage {
    /// Create a memory storage backend for the given local account
    pub fn new(local_service_id: ServiceId) -> Self {
        let self_id = RecipientId::new(1);
        let self_recipient = Recipient {
            id: self_id,
            service_id: Some(local_service_id),
            blocked: false,
            registration: RegistrationState::Registered,
            profile_key: None,
            access_key: None,
            sender_key_capable: true,
            profile_shared: true,
            is_self: true,
        };

        let mut recipients = HashMap::new();
        let mut recipients_by_service_id = HashMap::new();
        recipients.insert(self_id, self_recipient);
        recipients_by_service_id.insert(local_service_id, self_id);

        Self {
            inner: RwLock::new(Inner {
                recipients,
                recipients_by_service_id,
                next_recipient_id: 2,
                self_recipient: self_id,
                messages: LruCache::new(DEFAULT_MESSAGE_CACHE_SIZE),
                messages_by_thread: HashMap::new(),
                reactions: HashMap::new(),
                next_message_id: 1,
                groups: HashMap::new(),
                next_distribution_seed: 1,
                threads: HashMap::new(),
                threads_by_recipient: HashMap::new(),
                next_thread_id: 1,
                log_entries: HashMap::new(),
                next_log_entry_id: 1,
                pending_retries: HashMap::new(),
                sessions: HashMap::new(),
                identities: HashMap::new(),
                sender_key_distributions: HashMap::new(),
                sender_key_create_times: HashMap::new(),
                sender_key_shared: HashMap::new(),
            }),
        }
    }

    /// Seed a session record for a peer device. Test/setup seam.
    pub fn put_session(&self, address: ProtocolAddress, session: SessionRecord) {
        self.inner.write().sessions.insert(address, session);
    }

    /// Seed the create time of our sender key for a distribution. Test/setup seam.
    pub fn put_sender_key_create_time(&self, distribution_id: DistributionId, created_ms: u64) {
        self.inner
            .write()
            .sender_key_create_times
            .insert(distribution_id, created_ms);
    }

    /// Addresses our sender key has been shared with for a distribution
    pub fn sender_key_shared_with(&self, distribution_id: &DistributionId) -> Vec<ProtocolAddress> {
        self.inner
            .read()
            .sender_key_shared
            .get(distribution_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Sender key distribution messages processed for a peer address
    pub fn sender_key_distributions_for(&self, address: &ProtocolAddress) -> Vec<Vec<u8>> {
        self.inner
            .read()
            .sender_key_distributions
            .get(address)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(ServiceId::from_bytes([0u8; 16]))
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("MemoryStorage")
            .field("recipients", &inner.recipients.len())
            .field("messages", &inner.messages.len())
            .field("groups", &inner.groups.len())
            .field("threads", &inner.threads.len())
            .field("log_entries", &inner.log_entries.len())
            .finish()
    }
}

impl CourierStorageProvider for MemoryStorage {
    fn backend(&self) -> Backend {
        Backend::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type() {
        let storage = MemoryStorage::default();
        assert_eq!(storage.backend(), Backend::Memory);
        assert!(!storage.backend().is_persistent());
    }

    #[test]
    fn test_self_recipient_created_up_front() {
        use courier_storage_traits::recipients::RecipientStorage;

        let local = ServiceId::from_bytes([9u8; 16]);
        let storage = MemoryStorage::new(local);

        let me = storage.self_recipient().unwrap();
        assert!(me.is_self);
        assert_eq!(me.service_id, Some(local));
    }
}
