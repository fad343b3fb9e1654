//! The early message cache.
//!
//! Content whose logical target (a quoted message, a reacted-to message, a
//! story) has not arrived yet is parked here keyed by (target author,
//! target timestamp). When the target is processed, the parked entries are
//! replayed exactly once and discarded. The cache is bounded; entries that
//! never see their target are evicted.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use courier_storage_traits::RecipientId;

use crate::constant::EARLY_CACHE_SIZE;
use crate::content::{Content, EnvelopeMetadata};

/// A parked piece of content waiting for its target.
#[derive(Debug, Clone)]
pub(crate) struct EarlyEntry {
    pub content: Content,
    pub metadata: EnvelopeMetadata,
    pub client_timestamp_ms: u64,
    pub server_delivered_timestamp_ms: u64,
}

pub(crate) struct EarlyMessageCache {
    entries: Mutex<LruCache<(RecipientId, u64), Vec<EarlyEntry>>>,
}

impl EarlyMessageCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(EARLY_CACHE_SIZE).expect("cap must be non-zero"),
            )),
        }
    }

    /// Park an entry until the message (author, sent timestamp) arrives
    pub(crate) fn store(&self, author: RecipientId, target_timestamp_ms: u64, entry: EarlyEntry) {
        let mut entries = self.entries.lock();
        match entries.get_mut(&(author, target_timestamp_ms)) {
            Some(bucket) => bucket.push(entry),
            None => {
                entries.put((author, target_timestamp_ms), vec![entry]);
            }
        }
    }

    /// Take all entries waiting on (author, timestamp). Removal here is
    /// what guarantees replay-at-most-once.
    pub(crate) fn retrieve(
        &self,
        author: RecipientId,
        timestamp_ms: u64,
    ) -> Option<Vec<EarlyEntry>> {
        self.entries.lock().pop(&(author, timestamp_ms))
    }
}
