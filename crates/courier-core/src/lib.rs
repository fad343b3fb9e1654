//! Incoming message pipeline for an end-to-end encrypted messenger.
//!
//! This crate implements the path an encrypted envelope takes from the
//! server to durable local state: retrieval (over a persistent connection
//! or by polling), decryption through a stateful cipher, serialized content
//! processing with strict global ordering, and the mirror outbound path
//! that fans a message out to a group over a shared-key or pairwise
//! channel.
//!
//! The durable store is abstracted behind the `CourierStorageProvider`
//! trait; the cipher, transport, job queue, and wire sender are injected as
//! trait objects. Everything here is synchronous and thread-based: callers
//! block on the processor's global lock rather than cooperating on an event
//! loop, because receipt bookkeeping depends on a single consistent
//! ordering of all incoming content.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use courier_storage_traits::{CourierStorageProvider, DeviceId};

pub mod cipher;
mod constant;
pub mod content;
pub mod decrypt;
pub mod envelope;
pub mod error;
pub mod jobs;
pub mod observer;
pub mod prelude;
pub mod processor;
pub mod retrieval;
pub mod sender;
#[cfg(test)]
pub mod test_util;
pub mod transport;
mod util;

use self::cipher::EnvelopeCipher;
use self::constant::{
    DEFAULT_DECRYPTION_ERROR_RESET_AGE_MS, DEFAULT_MAX_DECRYPTION_ERRORS,
    DEFAULT_QUEUE_DRAIN_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_SENDER_KEY_MAX_AGE_MS,
};
pub use self::decrypt::DecryptionErrorCounts;
pub use self::error::Error;
use self::jobs::JobQueue;
use self::processor::early_cache::EarlyMessageCache;
pub use self::util::CancellationFlag;

// Re-export the ids most calls are keyed by
pub use courier_storage_traits::{GroupId, MessageId, RecipientId, ServiceId};

/// Configuration for pipeline behavior.
///
/// All fields have defaults that match a production deployment; tests
/// usually tweak one or two knobs.
///
/// # Examples
///
/// ```rust
/// use courier_core::CourierConfig;
///
/// // Use defaults (recommended for most cases)
/// let config = CourierConfig::default();
///
/// // Custom configuration
/// let config = CourierConfig {
///     typing_indicators_enabled: false,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct CourierConfig {
    /// Bound for a single blocking transport read.
    ///
    /// Default: 60 seconds
    pub read_timeout: std::time::Duration,

    /// Per-queue bound when waiting for background job queues to drain.
    ///
    /// Default: 30 seconds
    pub queue_drain_timeout: std::time::Duration,

    /// Maximum age of our sender key for a distribution before a send
    /// rotates it.
    ///
    /// Default: 14 days
    pub sender_key_max_age_ms: u64,

    /// Whether this device may use the shared-group (sender key) send path
    /// at all.
    pub sender_key_enabled: bool,

    /// Server-side override that drops the two-eligible-targets minimum for
    /// sender key sends.
    pub remove_sender_key_minimum: bool,

    /// Whether the local account has linked devices. When true, a group
    /// send with zero targets still produces a sync send.
    pub multi_device: bool,

    /// Whether incoming typing indicators are surfaced at all.
    pub typing_indicators_enabled: bool,

    /// Whether a decryption failure requests a resend from the peer before
    /// surfacing an error. When disabled, failures enqueue an automatic
    /// session reset and are swallowed.
    pub retry_receipts: bool,

    /// How many decryption errors from one sender are tolerated before the
    /// pipeline stops requesting retries from them.
    pub max_decryption_errors: u32,

    /// Quiet period after which a sender's decryption error count resets.
    pub decryption_error_reset_age_ms: u64,

    /// The local device id. The primary device is 1.
    pub local_device: DeviceId,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            queue_drain_timeout: DEFAULT_QUEUE_DRAIN_TIMEOUT,
            sender_key_max_age_ms: DEFAULT_SENDER_KEY_MAX_AGE_MS,
            sender_key_enabled: true,
            remove_sender_key_minimum: false,
            multi_device: false,
            typing_indicators_enabled: true,
            retry_receipts: false,
            max_decryption_errors: DEFAULT_MAX_DECRYPTION_ERRORS,
            decryption_error_reset_age_ms: DEFAULT_DECRYPTION_ERROR_RESET_AGE_MS,
            local_device: DeviceId::PRIMARY,
        }
    }
}

impl CourierConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }
}

/// Builder for constructing [`Courier`] instances.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use courier_core::{Courier, CourierConfig};
/// # use courier_core::cipher::EnvelopeCipher;
/// # use courier_core::jobs::JobQueue;
/// # use courier_memory_storage::MemoryStorage;
/// # fn demo(cipher: Arc<dyn EnvelopeCipher>, jobs: Arc<dyn JobQueue>) {
/// let courier = Courier::builder(MemoryStorage::default(), cipher, jobs)
///     .with_config(CourierConfig::new())
///     .build();
/// # }
/// ```
pub struct CourierBuilder<Storage> {
    storage: Storage,
    cipher: Arc<dyn EnvelopeCipher>,
    jobs: Arc<dyn JobQueue>,
    config: CourierConfig,
}

impl<Storage> std::fmt::Debug for CourierBuilder<Storage> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourierBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl<Storage> CourierBuilder<Storage>
where
    Storage: CourierStorageProvider,
{
    /// Create a new builder with the given storage, cipher, and job queue
    pub fn new(storage: Storage, cipher: Arc<dyn EnvelopeCipher>, jobs: Arc<dyn JobQueue>) -> Self {
        Self {
            storage,
            cipher,
            jobs,
            config: CourierConfig::default(),
        }
    }

    /// Set a custom configuration
    pub fn with_config(mut self, config: CourierConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the pipeline instance with the configured settings
    pub fn build(self) -> Courier<Storage> {
        Courier {
            storage: self.storage,
            cipher: self.cipher,
            jobs: self.jobs,
            config: self.config,
            process_lock: ReentrantMutex::new(()),
            early_cache: EarlyMessageCache::new(),
            decryption_errors: Mutex::new(DecryptionErrorCounts::new()),
        }
    }
}

/// The main entry type of the pipeline.
///
/// Holds the storage provider, the injected cipher and job queue, the
/// global processor lock, and the in-memory caches (early message cache,
/// per-sender decryption error counters). One instance is shared across
/// the connection observer thread and any number of worker threads.
pub struct Courier<Storage>
where
    Storage: CourierStorageProvider,
{
    /// Configuration for pipeline behavior
    pub config: CourierConfig,
    storage: Storage,
    cipher: Arc<dyn EnvelopeCipher>,
    jobs: Arc<dyn JobQueue>,
    process_lock: ReentrantMutex<()>,
    early_cache: EarlyMessageCache,
    decryption_errors: Mutex<DecryptionErrorCounts>,
}

impl<Storage> Courier<Storage>
where
    Storage: CourierStorageProvider,
{
    /// Create a builder for constructing a pipeline instance
    pub fn builder(
        storage: Storage,
        cipher: Arc<dyn EnvelopeCipher>,
        jobs: Arc<dyn JobQueue>,
    ) -> CourierBuilder<Storage> {
        CourierBuilder::new(storage, cipher, jobs)
    }

    /// Construct a new pipeline instance with default configuration
    pub fn new(
        storage: Storage,
        cipher: Arc<dyn EnvelopeCipher>,
        jobs: Arc<dyn JobQueue>,
    ) -> Self {
        Self::builder(storage, cipher, jobs).build()
    }

    /// Get the storage provider
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Get the job queue
    pub(crate) fn jobs(&self) -> &Arc<dyn JobQueue> {
        &self.jobs
    }

    /// Get the cipher
    pub(crate) fn cipher(&self) -> &Arc<dyn EnvelopeCipher> {
        &self.cipher
    }

    /// Get the early message cache
    pub(crate) fn early_cache(&self) -> &EarlyMessageCache {
        &self.early_cache
    }

    /// Get the decryption error counters
    pub(crate) fn decryption_errors(&self) -> &Mutex<DecryptionErrorCounts> {
        &self.decryption_errors
    }

    /// Get the processor lock
    pub(crate) fn process_lock(&self) -> &ReentrantMutex<()> {
        &self.process_lock
    }
}

impl<Storage> std::fmt::Debug for Courier<Storage>
where
    Storage: CourierStorageProvider,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Courier").field("config", &self.config).finish()
    }
}
