//! Encrypted envelopes as handed over by the transport

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use courier_storage_traits::{DeviceId, ServiceId};

/// An opaque encrypted unit received from the server.
///
/// Created by the transport, consumed exactly once by the decryption unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The sender's service id. Absent for sealed-sender envelopes, where
    /// the sender is only known after decryption.
    pub source_service_id: Option<ServiceId>,
    /// The sender's device id
    pub source_device: DeviceId,
    /// The account the envelope was addressed to
    pub destination_service_id: Option<ServiceId>,
    /// The envelope's type tag
    pub kind: EnvelopeKind,
    /// When the server accepted the envelope (milliseconds)
    pub server_timestamp_ms: u64,
    /// The sender's client-side timestamp (milliseconds). This is the key
    /// receipts, reactions, and retries reference.
    pub client_timestamp_ms: u64,
    /// Server-assigned unique id
    pub server_guid: String,
    /// The encrypted payload
    pub payload: Vec<u8>,
    /// Whether the server flagged this envelope as urgent
    pub urgent: bool,
}

impl Envelope {
    /// Log prefix identifying this envelope: timestamp, sender, device.
    pub fn log_prefix(&self) -> String {
        let sender = self
            .source_service_id
            .map(|s| s.to_string())
            .unwrap_or_else(|| "<sealed>".to_string());
        format!(
            "[{}] {}:{}",
            self.client_timestamp_ms, sender, self.source_device
        )
    }
}

/// Envelope type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EnvelopeKind {
    /// A prekey-initiated message that establishes a fresh session
    PrekeyBundle,
    /// An ordinary ciphertext message on an existing session
    Ciphertext,
    /// A sealed-sender message; the sender is inside the encryption
    UnidentifiedSender,
    /// An unencrypted (plaintext-content) message
    Plaintext,
    /// A server-generated delivery receipt
    Receipt,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl EnvelopeKind {
    /// Get as `&str`
    pub fn as_str(&self) -> &str {
        match self {
            Self::PrekeyBundle => "prekey_bundle",
            Self::Ciphertext => "ciphertext",
            Self::UnidentifiedSender => "unidentified_sender",
            Self::Plaintext => "plaintext",
            Self::Receipt => "receipt",
        }
    }
}

impl FromStr for EnvelopeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prekey_bundle" => Ok(Self::PrekeyBundle),
            "ciphertext" => Ok(Self::Ciphertext),
            "unidentified_sender" => Ok(Self::UnidentifiedSender),
            "plaintext" => Ok(Self::Plaintext),
            "receipt" => Ok(Self::Receipt),
            _ => Err(format!("Invalid envelope kind: {}", s)),
        }
    }
}

impl Serialize for EnvelopeKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EnvelopeKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}
