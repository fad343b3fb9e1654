//! Pipeline-wide defaults

use std::time::Duration;

/// Bound for a single blocking transport read
pub(crate) const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-queue bound when waiting for job queues to drain
pub(crate) const DEFAULT_QUEUE_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum age of our sender key before a send rotates it (14 days)
pub(crate) const DEFAULT_SENDER_KEY_MAX_AGE_MS: u64 = 14 * 24 * 60 * 60 * 1000;

/// Decryption errors tolerated per sender before retries stop
pub(crate) const DEFAULT_MAX_DECRYPTION_ERRORS: u32 = 10;

/// Quiet period after which a sender's decryption error count resets (1 hour)
pub(crate) const DEFAULT_DECRYPTION_ERROR_RESET_AGE_MS: u64 = 60 * 60 * 1000;

/// Simultaneous retrieval attempts allowed process-wide
pub(crate) const RETRIEVAL_CONCURRENCY_CAP: usize = 2;

/// Bound on distinct senders tracked for decryption error counting
pub(crate) const DECRYPTION_ERROR_SENDERS: usize = 100;

/// Bound on (sender, timestamp) keys held in the early message cache
pub(crate) const EARLY_CACHE_SIZE: usize = 500;
