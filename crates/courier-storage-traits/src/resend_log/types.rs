//! Types for the resend log module

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::{DeviceId, MessageId, RecipientId};

use super::error::ResendLogError;

/// Identifies a resend log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogEntryId(u64);

impl LogEntryId {
    /// Create a log entry id from its row value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The numeric value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Hint attached to an outbound ciphertext describing how a receiving peer
/// should treat a decryption failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContentHint {
    /// No special handling; the peer records an error immediately
    Default,
    /// The content can be resent; the peer may request a retry before
    /// surfacing an error
    Resendable,
    /// The content is implicit (typing, receipts); a failure is invisible
    Implicit,
}

impl Default for ContentHint {
    fn default() -> Self {
        Self::Default
    }
}

impl fmt::Display for ContentHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ContentHint {
    /// Get as `&str`
    pub fn as_str(&self) -> &str {
        match self {
            Self::Default => "default",
            Self::Resendable => "resendable",
            Self::Implicit => "implicit",
        }
    }
}

impl FromStr for ContentHint {
    type Err = ResendLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "resendable" => Ok(Self::Resendable),
            "implicit" => Ok(Self::Implicit),
            _ => Err(ResendLogError::InvalidParameters(format!(
                "Invalid content hint: {}",
                s
            ))),
        }
    }
}

impl Serialize for ContentHint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ContentHint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Insert payload for a new resend log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLogEntry {
    /// The recipients/devices this ciphertext was sent to
    pub recipients: Vec<(RecipientId, DeviceId)>,
    /// Client-side sent timestamp (milliseconds)
    pub sent_timestamp_ms: u64,
    /// The serialized content, exactly as sent
    pub content: Vec<u8>,
    /// The content hint the ciphertext carried
    pub content_hint: ContentHint,
    /// Whether the send was urgent
    pub urgent: bool,
    /// The stored message this send originated from
    pub related_message_id: Option<MessageId>,
}

/// A stored resend log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLogEntry {
    /// The assigned entry id
    pub id: LogEntryId,
    /// The recipients/devices this ciphertext was sent to
    pub recipients: Vec<(RecipientId, DeviceId)>,
    /// Client-side sent timestamp (milliseconds)
    pub sent_timestamp_ms: u64,
    /// The serialized content, exactly as sent
    pub content: Vec<u8>,
    /// The content hint the ciphertext carried
    pub content_hint: ContentHint,
    /// Whether the send was urgent
    pub urgent: bool,
    /// The stored message this send originated from
    pub related_message_id: Option<MessageId>,
}

impl MessageLogEntry {
    /// Build the stored entry from an insert payload and its assigned id
    pub fn from_new(id: LogEntryId, new: NewLogEntry) -> Self {
        Self {
            id,
            recipients: new.recipients,
            sent_timestamp_ms: new.sent_timestamp_ms,
            content: new.content,
            content_hint: new.content_hint,
            urgent: new.urgent,
            related_message_id: new.related_message_id,
        }
    }
}
