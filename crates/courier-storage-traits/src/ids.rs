//! Identifier newtypes shared across the pipeline.
//!
//! Every durable row and every protocol address is keyed by one of these.
//! They are deliberately small `Copy` types so they can be used as map keys
//! without cloning.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A stable service-level identity (the account UUID a peer is known by).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceId([u8; 16]);

impl ServiceId {
    /// Create a service id from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The raw bytes of this service id
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parse a service id from a 32-character hex string
    pub fn parse(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let bytes: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only a prefix; full service ids don't belong in logs
        write!(f, "ServiceId({}…)", hex::encode(&self.0[..4]))
    }
}

/// A device id within an account. The primary device is always device 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(u32);

impl DeviceId {
    /// The primary device id
    pub const PRIMARY: DeviceId = DeviceId(1);

    /// Create a device id
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// The numeric value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::PRIMARY
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A protocol-level address: a service id plus a device id.
///
/// All ratchet session and sender key state is keyed by this pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolAddress {
    /// The peer's service id
    pub service_id: ServiceId,
    /// The peer's device id
    pub device_id: DeviceId,
}

impl ProtocolAddress {
    /// Create a protocol address
    pub fn new(service_id: ServiceId, device_id: DeviceId) -> Self {
        Self {
            service_id,
            device_id,
        }
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service_id, self.device_id)
    }
}

/// Identifies a locally known recipient row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecipientId(u64);

impl RecipientId {
    /// Create a recipient id from its row value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The numeric value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Identifies a durably stored message row.
///
/// Created on successful insert; referenced by reactions, receipts,
/// remote-deletes, and resend log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(u64);

impl MessageId {
    /// Create a message id from its row value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The numeric value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// Identifies a conversation thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Create a thread id from its row value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The numeric value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Identifies a shared-group (sender key) distribution.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DistributionId([u8; 16]);

impl DistributionId {
    /// Create a distribution id from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The raw bytes of this distribution id
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for DistributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for DistributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DistributionId({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_service_id_roundtrip() {
        let id = ServiceId::from_bytes([7u8; 16]);
        let parsed = ServiceId::parse(&id.to_string()).expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_service_id_parse_rejects_garbage() {
        assert!(ServiceId::parse("not-hex").is_none());
        assert!(ServiceId::parse("abcd").is_none());
    }

    #[test]
    fn test_service_id_debug_is_truncated() {
        let id = ServiceId::from_bytes([0xab; 16]);
        let debug = format!("{:?}", id);
        assert!(debug.contains("abababab"));
        assert!(!debug.contains(&hex::encode([0xab; 16])));
    }

    #[test]
    fn test_protocol_address_display() {
        let addr = ProtocolAddress::new(ServiceId::from_bytes([1u8; 16]), DeviceId::new(2));
        assert!(addr.to_string().ends_with(".2"));
    }

    #[test]
    fn test_ids_as_map_keys() {
        let mut set = HashSet::new();
        set.insert(RecipientId::new(1));
        set.insert(RecipientId::new(2));
        set.insert(RecipientId::new(1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_primary_device() {
        assert_eq!(DeviceId::PRIMARY.value(), 1);
    }

    #[test]
    fn test_id_serialization() {
        let id = MessageId::new(42);
        let json = serde_json::to_string(&id).unwrap();
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
