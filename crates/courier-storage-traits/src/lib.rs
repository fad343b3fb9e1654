//! Courier storage - storage provider traits and types for the courier
//! message pipeline.
//!
//! The pipeline core treats the durable store as an external collaborator:
//! every insert/query/update it needs is expressed here as a narrow trait
//! method with defined pre/post-conditions, and backends implement the
//! combined [`CourierStorageProvider`] trait. The protocol store (ratchet
//! sessions, identities, sender keys) is part of the same provider so that
//! a backend can manage both kinds of state atomically.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

pub mod error;
pub mod group_id;
pub mod groups;
pub mod ids;
pub mod messages;
pub mod protocol;
pub mod recipients;
pub mod resend_log;
pub mod retry_receipts;
/// Secret wrapper for zeroization
pub mod secret;
pub mod threads;

pub use error::CourierStorageError;
pub use group_id::GroupId;
pub use ids::{
    DeviceId, DistributionId, MessageId, ProtocolAddress, RecipientId, ServiceId, ThreadId,
};
pub use secret::{Secret, Zeroize};

use self::groups::GroupStorage;
use self::messages::MessageStorage;
use self::protocol::ProtocolStore;
use self::recipients::RecipientStorage;
use self::resend_log::MessageLogStorage;
use self::retry_receipts::RetryReceiptStorage;
use self::threads::ThreadStorage;

/// Backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Memory
    Memory,
    /// SQLite
    SQLite,
}

impl Backend {
    /// Check if it's a persistent backend
    ///
    /// All values different from [`Backend::Memory`] are considered persistent
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Self::Memory)
    }
}

/// Storage provider for the courier pipeline.
///
/// This trait combines every storage concern the pipeline touches:
/// - Recipient storage for identity resolution and block/registration state
/// - Message storage for inserted rows, reactions, and receipt counters
/// - Group storage for membership, activity, and distribution ids
/// - Thread storage for conversation bookkeeping
/// - The resend log for previously sent ciphertexts
/// - Pending retry receipts for decryption-failure bookkeeping
/// - The protocol store for ratchet session, identity, and sender key state
///
/// Each individual call is treated as atomic and immediately consistent.
/// Multi-step sequences that must be atomic together are bracketed with
/// [`CourierStorageProvider::transactionally`].
pub trait CourierStorageProvider:
    RecipientStorage
    + MessageStorage
    + GroupStorage
    + ThreadStorage
    + MessageLogStorage
    + RetryReceiptStorage
    + ProtocolStore
{
    /// Returns the backend type.
    fn backend(&self) -> Backend;

    /// Run `f` inside a storage transaction.
    ///
    /// Backends without transactional semantics (e.g. memory) may run the
    /// closure directly; the default implementation does exactly that.
    fn transactionally<T>(
        &self,
        f: impl FnOnce() -> Result<T, CourierStorageError>,
    ) -> Result<T, CourierStorageError> {
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_is_persistent() {
        assert!(!Backend::Memory.is_persistent());
        assert!(Backend::SQLite.is_persistent());
    }
}
