//! Memory-based implementation of the groups storage traits

use courier_storage_traits::groups::GroupStorage;
use courier_storage_traits::groups::error::GroupError;
use courier_storage_traits::groups::types::Group;
use courier_storage_traits::{DistributionId, GroupId};

use crate::MemoryStorage;

impl GroupStorage for MemoryStorage {
    fn find_group(&self, id: &GroupId) -> Result<Option<Group>, GroupError> {
        Ok(self.inner.read().groups.get(id).cloned())
    }

    fn save_group(&self, group: Group) -> Result<(), GroupError> {
        self.inner.write().groups.insert(group.id.clone(), group);
        Ok(())
    }

    fn find_group_by_recipient(
        &self,
        recipient: courier_storage_traits::RecipientId,
    ) -> Result<Option<Group>, GroupError> {
        Ok(self
            .inner
            .read()
            .groups
            .values()
            .find(|group| group.recipient == recipient)
            .cloned())
    }

    fn get_or_create_distribution_id(
        &self,
        id: &GroupId,
    ) -> Result<DistributionId, GroupError> {
        let mut inner = self.inner.write();

        let seed = inner.next_distribution_seed;
        let group = inner.groups.get_mut(id).ok_or(GroupError::NotFound)?;

        if let Some(distribution_id) = group.distribution_id {
            return Ok(distribution_id);
        }

        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&seed.to_be_bytes());
        let distribution_id = DistributionId::from_bytes(bytes);

        group.distribution_id = Some(distribution_id);
        inner.next_distribution_seed += 1;

        Ok(distribution_id)
    }
}
