//! Types for the groups module

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::group_id::GroupId;
use crate::ids::{DistributionId, RecipientId};
use crate::secret::Secret;

use super::error::GroupError;

/// A locally known group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// The group id
    pub id: GroupId,
    /// Which generation of the group protocol this group uses
    pub version: GroupVersion,
    /// The master key for new-style groups. Legacy groups have none.
    pub master_key: Option<Secret<[u8; 32]>>,
    /// The latest group revision we have applied
    pub revision: u32,
    /// Whether we are an active member
    pub active: bool,
    /// Whether only admins may post content
    pub announcement_only: bool,
    /// Current members
    pub members: Vec<RecipientId>,
    /// Current admins (subset of members)
    pub admins: Vec<RecipientId>,
    /// The distribution id for shared-group sends, once assigned
    pub distribution_id: Option<DistributionId>,
    /// The recipient row representing this group conversation
    pub recipient: RecipientId,
}

impl Group {
    /// Whether the recipient is an admin of this group
    pub fn is_admin(&self, recipient: RecipientId) -> bool {
        self.admins.contains(&recipient)
    }
}

/// Which generation of the group protocol a group uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupVersion {
    /// Legacy groups: no server-held state, updated by request-info messages
    Legacy,
    /// New-style groups: state derived from a shared master key
    V2,
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl GroupVersion {
    /// Get as `&str`
    pub fn as_str(&self) -> &str {
        match self {
            Self::Legacy => "legacy",
            Self::V2 => "v2",
        }
    }
}

impl FromStr for GroupVersion {
    type Err = GroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(Self::Legacy),
            "v2" => Ok(Self::V2),
            _ => Err(GroupError::InvalidParameters(format!(
                "Invalid group version: {}",
                s
            ))),
        }
    }
}

impl Serialize for GroupVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for GroupVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_group() -> Group {
        Group {
            id: GroupId::from_slice(&[1, 2, 3, 4]),
            version: GroupVersion::V2,
            master_key: Some(Secret::new([5u8; 32])),
            revision: 3,
            active: true,
            announcement_only: false,
            members: vec![RecipientId::new(1), RecipientId::new(2)],
            admins: vec![RecipientId::new(1)],
            distribution_id: None,
            recipient: RecipientId::new(10),
        }
    }

    #[test]
    fn test_is_admin() {
        let group = test_group();
        assert!(group.is_admin(RecipientId::new(1)));
        assert!(!group.is_admin(RecipientId::new(2)));
    }

    #[test]
    fn test_group_version_roundtrip() {
        assert_eq!(GroupVersion::from_str("legacy").unwrap(), GroupVersion::Legacy);
        assert_eq!(GroupVersion::from_str("v2").unwrap(), GroupVersion::V2);
        assert!(GroupVersion::from_str("v3").is_err());
    }

    #[test]
    fn test_group_serialization() {
        let group = test_group();
        let json = serde_json::to_value(&group).unwrap();
        assert_eq!(json["version"], serde_json::json!("v2"));

        let back: Group = serde_json::from_value(json).unwrap();
        assert_eq!(back, test_group());
    }
}
