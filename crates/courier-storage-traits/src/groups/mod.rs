//! Groups module
//!
//! Group state the pipeline reads while filtering and routing incoming
//! content: membership, activity, admin lists, and the distribution id
//! used for shared-group (sender key) sends.

use crate::group_id::GroupId;
use crate::ids::{DistributionId, RecipientId};

pub mod error;
pub mod types;

use self::error::GroupError;
use self::types::*;

/// Storage traits for the groups module
pub trait GroupStorage {
    /// Find a group by id
    fn find_group(&self, id: &GroupId) -> Result<Option<Group>, GroupError>;

    /// Save a group row, replacing any existing row with the same id
    fn save_group(&self, group: Group) -> Result<(), GroupError>;

    /// Find the group whose conversation is represented by the given
    /// recipient row
    fn find_group_by_recipient(
        &self,
        recipient: RecipientId,
    ) -> Result<Option<Group>, GroupError>;

    /// Whether we have no local record of this group
    fn is_unknown_group(&self, id: &GroupId) -> Result<bool, GroupError> {
        Ok(self.find_group(id)?.is_none())
    }

    /// Whether the group exists locally and we are an active member
    fn is_active(&self, id: &GroupId) -> Result<bool, GroupError> {
        Ok(self.find_group(id)?.map(|g| g.active).unwrap_or(false))
    }

    /// Whether the recipient is currently a member of the group
    fn is_current_member(&self, id: &GroupId, recipient: RecipientId) -> Result<bool, GroupError> {
        Ok(self
            .find_group(id)?
            .map(|g| g.members.contains(&recipient))
            .unwrap_or(false))
    }

    /// The distribution id for a group, creating one if the group exists but
    /// has never been assigned one.
    fn get_or_create_distribution_id(&self, id: &GroupId)
    -> Result<DistributionId, GroupError>;
}
