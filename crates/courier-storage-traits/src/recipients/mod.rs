//! Recipients module
//!
//! A recipient is any party we can address: a 1:1 peer, ourselves, or the
//! synthetic recipient that represents a group conversation. Identity
//! resolution is "high trust": once a service id is bound to a recipient
//! row, that binding holds going forward.

use crate::ids::{RecipientId, ServiceId};
use crate::secret::Secret;

pub mod error;
pub mod types;

use self::error::RecipientError;
use self::types::*;

/// Storage traits for the recipients module
pub trait RecipientStorage {
    /// Resolve a service id to a recipient, creating a new recipient row if
    /// the service id was previously unknown (high-trust resolution).
    fn resolve_service_id(&self, service_id: &ServiceId) -> Result<Recipient, RecipientError>;

    /// Find a recipient by id
    fn find_recipient(&self, id: RecipientId) -> Result<Option<Recipient>, RecipientError>;

    /// Save a recipient row, replacing any existing row with the same id
    fn save_recipient(&self, recipient: Recipient) -> Result<(), RecipientError>;

    /// Persist a new profile key for a recipient.
    ///
    /// Returns `true` when the stored key actually changed.
    fn set_profile_key(
        &self,
        id: RecipientId,
        profile_key: Secret<[u8; 32]>,
    ) -> Result<bool, RecipientError>;

    /// Update a recipient's registration state
    fn set_registration_state(
        &self,
        id: RecipientId,
        state: RegistrationState,
    ) -> Result<(), RecipientError>;

    /// The recipient row representing the local account
    fn self_recipient(&self) -> Result<Recipient, RecipientError>;
}
