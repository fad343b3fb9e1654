//! Memory-based implementation of the protocol store traits

use std::time::{SystemTime, UNIX_EPOCH};

use courier_storage_traits::protocol::ProtocolStore;
use courier_storage_traits::protocol::error::ProtocolError;
use courier_storage_traits::protocol::types::{IdentityKey, SessionRecord};
use courier_storage_traits::{DistributionId, ProtocolAddress, ServiceId};

use crate::MemoryStorage;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before Unix epoch")
        .as_millis() as u64
}

impl ProtocolStore for MemoryStorage {
    fn load_session(
        &self,
        address: &ProtocolAddress,
    ) -> Result<Option<SessionRecord>, ProtocolError> {
        Ok(self.inner.read().sessions.get(address).cloned())
    }

    fn archive_session(&self, address: &ProtocolAddress) -> Result<(), ProtocolError> {
        let mut inner = self.inner.write();
        let session = inner.sessions.get_mut(address).ok_or(ProtocolError::NoSession)?;
        session.archived = true;
        session.current_ratchet_key = None;
        Ok(())
    }

    fn delete_all_sessions(&self, service_id: &ServiceId) -> Result<(), ProtocolError> {
        self.inner
            .write()
            .sessions
            .retain(|address, _| address.service_id != *service_id);
        Ok(())
    }

    fn save_identity(
        &self,
        address: &ProtocolAddress,
        identity: IdentityKey,
    ) -> Result<bool, ProtocolError> {
        let mut inner = self.inner.write();
        let replaced = match inner.identities.get(address) {
            Some(existing) => existing != &identity,
            None => false,
        };
        inner.identities.insert(*address, identity);
        Ok(replaced)
    }

    fn process_sender_key_distribution(
        &self,
        address: &ProtocolAddress,
        message: &[u8],
    ) -> Result<(), ProtocolError> {
        self.inner
            .write()
            .sender_key_distributions
            .entry(*address)
            .or_default()
            .push(message.to_vec());
        Ok(())
    }

    fn sender_key_create_time(
        &self,
        distribution_id: &DistributionId,
    ) -> Result<Option<u64>, ProtocolError> {
        Ok(self
            .inner
            .read()
            .sender_key_create_times
            .get(distribution_id)
            .copied())
    }

    fn rotate_sender_key(&self, distribution_id: &DistributionId) -> Result<(), ProtocolError> {
        let mut inner = self.inner.write();
        inner
            .sender_key_create_times
            .insert(*distribution_id, now_ms());
        // A rotated key has been shared with nobody yet
        inner.sender_key_shared.remove(distribution_id);
        Ok(())
    }

    fn clear_sender_key_shared_with(
        &self,
        distribution_id: &DistributionId,
        addresses: &[ProtocolAddress],
    ) -> Result<(), ProtocolError> {
        let mut inner = self.inner.write();
        if let Some(shared) = inner.sender_key_shared.get_mut(distribution_id) {
            for address in addresses {
                shared.remove(address);
            }
        }
        Ok(())
    }

    fn mark_sender_key_shared_with(
        &self,
        distribution_id: &DistributionId,
        addresses: &[ProtocolAddress],
    ) -> Result<(), ProtocolError> {
        let mut inner = self.inner.write();
        let shared = inner.sender_key_shared.entry(*distribution_id).or_default();
        for address in addresses {
            shared.insert(*address);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use courier_storage_traits::DeviceId;
    use courier_storage_traits::protocol::types::RatchetKey;
    use courier_storage_traits::secret::Secret;

    use super::*;

    fn address(byte: u8, device: u32) -> ProtocolAddress {
        ProtocolAddress::new(ServiceId::from_bytes([byte; 16]), DeviceId::new(device))
    }

    fn session() -> SessionRecord {
        SessionRecord {
            current_ratchet_key: Some(RatchetKey::from_bytes(vec![1, 2, 3])),
            archived: false,
            root_key: Secret::new(vec![0; 32]),
        }
    }

    #[test]
    fn test_archive_session() {
        let storage = MemoryStorage::default();
        let addr = address(1, 1);

        assert_eq!(
            storage.archive_session(&addr),
            Err(ProtocolError::NoSession)
        );

        storage.put_session(addr, session());
        storage.archive_session(&addr).unwrap();

        let archived = storage.load_session(&addr).unwrap().unwrap();
        assert!(archived.archived);
        assert!(archived.current_ratchet_key.is_none());
    }

    #[test]
    fn test_delete_all_sessions() {
        let storage = MemoryStorage::default();
        storage.put_session(address(1, 1), session());
        storage.put_session(address(1, 2), session());
        storage.put_session(address(2, 1), session());

        storage
            .delete_all_sessions(&ServiceId::from_bytes([1u8; 16]))
            .unwrap();

        assert!(storage.load_session(&address(1, 1)).unwrap().is_none());
        assert!(storage.load_session(&address(1, 2)).unwrap().is_none());
        assert!(storage.load_session(&address(2, 1)).unwrap().is_some());
    }

    #[test]
    fn test_save_identity_reports_replacement() {
        let storage = MemoryStorage::default();
        let addr = address(3, 1);

        let first = IdentityKey::from_bytes(vec![1]);
        let second = IdentityKey::from_bytes(vec![2]);

        assert!(!storage.save_identity(&addr, first.clone()).unwrap());
        assert!(!storage.save_identity(&addr, first).unwrap());
        assert!(storage.save_identity(&addr, second).unwrap());
    }

    #[test]
    fn test_sender_key_shared_bookkeeping() {
        let storage = MemoryStorage::default();
        let distribution_id = DistributionId::from_bytes([7u8; 16]);
        let a = address(1, 1);
        let b = address(2, 1);

        storage
            .mark_sender_key_shared_with(&distribution_id, &[a, b])
            .unwrap();
        assert_eq!(storage.sender_key_shared_with(&distribution_id).len(), 2);

        storage
            .clear_sender_key_shared_with(&distribution_id, &[a])
            .unwrap();
        assert_eq!(storage.sender_key_shared_with(&distribution_id), vec![b]);
    }

    #[test]
    fn test_rotate_clears_shared_set() {
        let storage = MemoryStorage::default();
        let distribution_id = DistributionId::from_bytes([7u8; 16]);

        storage.put_sender_key_create_time(distribution_id, 1);
        storage
            .mark_sender_key_shared_with(&distribution_id, &[address(1, 1)])
            .unwrap();

        storage.rotate_sender_key(&distribution_id).unwrap();

        assert!(storage.sender_key_shared_with(&distribution_id).is_empty());
        let created = storage
            .sender_key_create_time(&distribution_id)
            .unwrap()
            .unwrap();
        assert!(created > 1);
    }
}
