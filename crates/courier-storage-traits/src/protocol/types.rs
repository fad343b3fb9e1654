//! Types for the protocol store module

use serde::{Deserialize, Serialize};

use crate::secret::Secret;

/// The current ratchet key of a session, as an opaque public point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetKey(Vec<u8>);

impl RatchetKey {
    /// Create a ratchet key from raw bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw bytes of this key
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A peer identity key, as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityKey(Vec<u8>);

impl IdentityKey {
    /// Create an identity key from raw bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw bytes of this key
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A ratchet session with a single peer device.
///
/// Only the pieces the pipeline reads are modeled: the current receiving
/// ratchet key (compared against retry receipts) and whether the session
/// has been archived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// The session's current ratchet key, absent for freshly archived
    /// sessions
    pub current_ratchet_key: Option<RatchetKey>,
    /// Whether this session has been archived
    pub archived: bool,
    /// The session's root key material
    pub root_key: Secret<Vec<u8>>,
}

impl SessionRecord {
    /// Whether the supplied key matches this session's current ratchet key
    pub fn current_ratchet_key_matches(&self, key: &RatchetKey) -> bool {
        self.current_ratchet_key
            .as_ref()
            .map(|current| current == key)
            .unwrap_or(false)
    }
}
