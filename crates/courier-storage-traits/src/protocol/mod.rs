//! Protocol store module
//!
//! The interface to the external ratchet/session state store. The pipeline
//! only mutates this state in two places - the decryption unit and the
//! retry-receipt handling inside the content processor - and both run under
//! the processor's global lock, so implementations need no additional
//! locking for correctness (the memory backend still locks for safety).

use crate::ids::{DistributionId, ProtocolAddress, ServiceId};

pub mod error;
pub mod types;

use self::error::ProtocolError;
use self::types::*;

/// Session, identity, and sender key state, keyed by protocol address.
pub trait ProtocolStore {
    /// Load the current session with a peer device, if one exists
    fn load_session(
        &self,
        address: &ProtocolAddress,
    ) -> Result<Option<SessionRecord>, ProtocolError>;

    /// Archive the current session with a peer device, forcing fresh key
    /// agreement on the next send
    fn archive_session(&self, address: &ProtocolAddress) -> Result<(), ProtocolError>;

    /// Delete every session with every device of a peer
    fn delete_all_sessions(&self, service_id: &ServiceId) -> Result<(), ProtocolError>;

    /// Save a peer identity. Returns `true` when this replaced a different
    /// previously stored identity.
    fn save_identity(
        &self,
        address: &ProtocolAddress,
        identity: IdentityKey,
    ) -> Result<bool, ProtocolError>;

    /// Apply a sender key distribution message received from a peer
    fn process_sender_key_distribution(
        &self,
        address: &ProtocolAddress,
        message: &[u8],
    ) -> Result<(), ProtocolError>;

    /// When our own sender key for a distribution was created (milliseconds),
    /// if we have one
    fn sender_key_create_time(
        &self,
        distribution_id: &DistributionId,
    ) -> Result<Option<u64>, ProtocolError>;

    /// Rotate our own sender key for a distribution
    fn rotate_sender_key(&self, distribution_id: &DistributionId) -> Result<(), ProtocolError>;

    /// Forget that we shared our sender key with the given peer addresses,
    /// so the next send re-distributes it
    fn clear_sender_key_shared_with(
        &self,
        distribution_id: &DistributionId,
        addresses: &[ProtocolAddress],
    ) -> Result<(), ProtocolError>;

    /// Record that we shared our sender key with the given peer addresses
    fn mark_sender_key_shared_with(
        &self,
        distribution_id: &DistributionId,
        addresses: &[ProtocolAddress],
    ) -> Result<(), ProtocolError>;
}
