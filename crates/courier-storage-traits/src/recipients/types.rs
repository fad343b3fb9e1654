//! Types for the recipients module

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::{RecipientId, ServiceId};
use crate::secret::Secret;

use super::error::RecipientError;

/// A locally known recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// The local row id
    pub id: RecipientId,
    /// The stable service identity, if known. Recipients without a service
    /// id cannot be addressed over the wire.
    pub service_id: Option<ServiceId>,
    /// Whether the user has blocked this recipient
    pub blocked: bool,
    /// Registration state on the service
    pub registration: RegistrationState,
    /// The recipient's profile key, if they have shared it with us
    pub profile_key: Option<Secret<[u8; 32]>>,
    /// Access credential used for sealed sends to this recipient
    pub access_key: Option<Secret<[u8; 16]>>,
    /// Whether this recipient's clients support shared-group (sender key)
    /// encryption
    pub sender_key_capable: bool,
    /// Whether we have shared our profile key with this recipient
    pub profile_shared: bool,
    /// Whether this recipient is the local account
    pub is_self: bool,
}

impl Recipient {
    /// Whether this recipient is known to be unregistered
    pub fn is_unregistered(&self) -> bool {
        self.registration == RegistrationState::Unregistered
    }

    /// The service id, or an error when the recipient has none
    pub fn require_service_id(&self) -> Result<ServiceId, RecipientError> {
        self.service_id.ok_or_else(|| {
            RecipientError::InvalidParameters("recipient has no service id".to_string())
        })
    }
}

/// Registration state of a recipient on the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegistrationState {
    /// Known to be registered
    Registered,
    /// Known to be unregistered
    Unregistered,
    /// Never checked
    Unknown,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl RegistrationState {
    /// Get as `&str`
    pub fn as_str(&self) -> &str {
        match self {
            Self::Registered => "registered",
            Self::Unregistered => "unregistered",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for RegistrationState {
    type Err = RecipientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registered" => Ok(Self::Registered),
            "unregistered" => Ok(Self::Unregistered),
            "unknown" => Ok(Self::Unknown),
            _ => Err(RecipientError::InvalidParameters(format!(
                "Invalid registration state: {}",
                s
            ))),
        }
    }
}

impl Serialize for RegistrationState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RegistrationState {
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

    fn test_recipient() -> Recipient {
        Recipient {
            id: RecipientId::new(1),
            service_id: Some(ServiceId::from_bytes([1u8; 16])),
            blocked: false,
            registration: RegistrationState::Registered,
            profile_key: None,
            access_key: None,
            sender_key_capable: true,
            profile_shared: false,
            is_self: false,
        }
    }

    #[test]
    fn test_registration_state_roundtrip() {
        for state in [
            RegistrationState::Registered,
            RegistrationState::Unregistered,
            RegistrationState::Unknown,
        ] {
            let parsed = RegistrationState::from_str(state.as_str()).unwrap();
            assert_eq!(parsed, state);
        }

        assert!(RegistrationState::from_str("bogus").is_err());
    }

    #[test]
    fn test_require_service_id() {
        let recipient = test_recipient();
        assert!(recipient.require_service_id().is_ok());

        let mut no_sid = recipient;
        no_sid.service_id = None;
        assert!(no_sid.require_service_id().is_err());
    }

    #[test]
    fn test_is_unregistered() {
        let mut recipient = test_recipient();
        assert!(!recipient.is_unregistered());

        recipient.registration = RegistrationState::Unregistered;
        assert!(recipient.is_unregistered());

        recipient.registration = RegistrationState::Unknown;
        assert!(!recipient.is_unregistered());
    }

    #[test]
    fn test_recipient_serialization() {
        let recipient = test_recipient();
        let json = serde_json::to_value(&recipient).unwrap();
        assert_eq!(json["registration"], serde_json::json!("registered"));

        let back: Recipient = serde_json::from_value(json).unwrap();
        assert_eq!(back, test_recipient());
    }
}
