//! Courier Public Prelude
//!
//! This module provides the essential types users need to work with the
//! pipeline. It only includes the core pipeline types and storage traits -
//! the cipher, transport, and job queue implementations live with the
//! application and should be imported from their own crates.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use courier_core::prelude::*;
//! use courier_memory_storage::MemoryStorage;
//!
//! let courier = Courier::new(MemoryStorage::default(), cipher, jobs);
//! ```

// === Core Pipeline Types ===
/// Pipeline error type
pub use crate::Error;
/// The main pipeline struct
pub use crate::Courier;
/// Pipeline configuration
pub use crate::CourierConfig;
/// Cooperative cancellation
pub use crate::CancellationFlag;

// === Injected Capabilities ===
/// The opaque cipher capability
pub use crate::cipher::{CipherError, CipherResult, EnvelopeCipher};
/// The background job queue
pub use crate::jobs::{Job, JobChain, JobQueue};
/// The envelope transport
pub use crate::transport::{Transport, TransportError};

// === Pipeline Result Types ===
/// Decryption outcomes
pub use crate::decrypt::{DecryptionResult, MessageState};
/// Decrypted content variants
pub use crate::content::Content;
/// Raw envelopes
pub use crate::envelope::{Envelope, EnvelopeKind};
/// Fan-out send surface
pub use crate::sender::{SendOperation, SendOutcome, SendResult, WireSender};
/// Retrieval strategies and the connection observer
pub use crate::observer::ConnectionObserver;
pub use crate::retrieval::{
    ConnectionRetriever, PollingRetriever, RetrievalPermits, RetrievalStrategy,
};

// === Storage Traits (users need these to provide storage implementations) ===
pub use courier_storage_traits::{Backend, CourierStorageProvider, GroupId};

// === Storage Type Aliases (convenient for users working with storage) ===
pub use courier_storage_traits::groups::types as group_types;
pub use courier_storage_traits::messages::types as message_types;
pub use courier_storage_traits::recipients::types as recipient_types;
pub use courier_storage_traits::resend_log::types as resend_log_types;
