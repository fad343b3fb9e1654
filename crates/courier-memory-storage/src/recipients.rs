//! Memory-based implementation of the recipients storage traits

use courier_storage_traits::recipients::RecipientStorage;
use courier_storage_traits::recipients::error::RecipientError;
use courier_storage_traits::recipients::types::{Recipient, RegistrationState};
use courier_storage_traits::secret::Secret;
use courier_storage_traits::{RecipientId, ServiceId};

use crate::MemoryStorage;

impl RecipientStorage for MemoryStorage {
    fn resolve_service_id(&self, service_id: &ServiceId) -> Result<Recipient, RecipientError> {
        let mut inner = self.inner.write();

        if let Some(id) = inner.recipients_by_service_id.get(service_id).copied() {
            return inner
                .recipients
                .get(&id)
                .cloned()
                .ok_or(RecipientError::NotFound);
        }

        let id = RecipientId::new(inner.next_recipient_id);
        inner.next_recipient_id += 1;

        let recipient = Recipient {
            id,
            service_id: Some(*service_id),
            blocked: false,
            registration: RegistrationState::Unknown,
            profile_key: None,
            access_key: None,
            sender_key_capable: false,
            profile_shared: false,
            is_self: false,
        };

        inner.recipients.insert(id, recipient.clone());
        inner.recipients_by_service_id.insert(*service_id, id);

        Ok(recipient)
    }

    fn find_recipient(&self, id: RecipientId) -> Result<Option<Recipient>, RecipientError> {
        Ok(self.inner.read().recipients.get(&id).cloned())
    }

    fn save_recipient(&self, recipient: Recipient) -> Result<(), RecipientError> {
        let mut inner = self.inner.write();
        if let Some(service_id) = recipient.service_id {
            inner.recipients_by_service_id.insert(service_id, recipient.id);
        }
        inner.recipients.insert(recipient.id, recipient);
        Ok(())
    }

    fn set_profile_key(
        &self,
        id: RecipientId,
        profile_key: Secret<[u8; 32]>,
    ) -> Result<bool, RecipientError> {
        let mut inner = self.inner.write();
        let recipient = inner.recipients.get_mut(&id).ok_or(RecipientError::NotFound)?;

        let changed = recipient.profile_key.as_ref() != Some(&profile_key);
        recipient.profile_key = Some(profile_key);
        Ok(changed)
    }

    fn set_registration_state(
        &self,
        id: RecipientId,
        state: RegistrationState,
    ) -> Result<(), RecipientError> {
        let mut inner = self.inner.write();
        let recipient = inner.recipients.get_mut(&id).ok_or(RecipientError::NotFound)?;
        recipient.registration = state;
        Ok(())
    }

    fn self_recipient(&self) -> Result<Recipient, RecipientError> {
        let inner = self.inner.read();
        inner
            .recipients
            .get(&inner.self_recipient)
            .cloned()
            .ok_or(RecipientError::NotFound)
    }
}
