//! Types for the messages module

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::{DeviceId, MessageId, RecipientId, ThreadId};

use super::error::MessageError;

/// A message row as handed to [`super::MessageStorage::insert_message`].
///
/// The storage backend assigns the [`MessageId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// The thread this message belongs to
    pub thread: ThreadId,
    /// The author
    pub sender: RecipientId,
    /// The author's device
    pub sender_device: DeviceId,
    /// Client-side sent timestamp (milliseconds)
    pub sent_timestamp_ms: u64,
    /// Server receive timestamp (milliseconds)
    pub server_timestamp_ms: u64,
    /// Local receive timestamp (milliseconds)
    pub received_timestamp_ms: u64,
    /// What kind of row this is
    pub kind: MessageKind,
    /// Text body, when present
    pub body: Option<String>,
    /// Number of attachments carried
    pub attachment_count: u32,
    /// Message expiry, when the conversation has disappearing messages
    pub expires_in_ms: Option<u64>,
    /// Whether this row was authored by the local account
    pub outgoing: bool,
}

/// A durably stored message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// The assigned row id
    pub id: MessageId,
    /// The thread this message belongs to
    pub thread: ThreadId,
    /// The author
    pub sender: RecipientId,
    /// The author's device
    pub sender_device: DeviceId,
    /// Client-side sent timestamp (milliseconds)
    pub sent_timestamp_ms: u64,
    /// Server receive timestamp (milliseconds)
    pub server_timestamp_ms: u64,
    /// Local receive timestamp (milliseconds)
    pub received_timestamp_ms: u64,
    /// What kind of row this is
    pub kind: MessageKind,
    /// Text body, when present
    pub body: Option<String>,
    /// Number of attachments carried
    pub attachment_count: u32,
    /// Message expiry, when the conversation has disappearing messages
    pub expires_in_ms: Option<u64>,
    /// Whether this row was authored by the local account
    pub outgoing: bool,
    /// Whether the original sender remotely deleted this message
    pub remotely_deleted: bool,
    /// How many recipients have acknowledged delivery
    pub delivery_receipt_count: u32,
    /// How many recipients have acknowledged reading
    pub read_receipt_count: u32,
}

impl MessageRecord {
    /// Build the stored record from an insert payload and its assigned id
    pub fn from_new(id: MessageId, new: NewMessage) -> Self {
        Self {
            id,
            thread: new.thread,
            sender: new.sender,
            sender_device: new.sender_device,
            sent_timestamp_ms: new.sent_timestamp_ms,
            server_timestamp_ms: new.server_timestamp_ms,
            received_timestamp_ms: new.received_timestamp_ms,
            kind: new.kind,
            body: new.body,
            attachment_count: new.attachment_count,
            expires_in_ms: new.expires_in_ms,
            outgoing: new.outgoing,
            remotely_deleted: false,
            delivery_receipt_count: 0,
            read_receipt_count: 0,
        }
    }
}

/// What a stored message row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Plain text message
    Text,
    /// Message carrying media (attachments, stickers, previews, …)
    Media,
    /// Conversation expiration timer change
    ExpirationUpdate,
    /// Group call started/updated notice
    GroupCallUpdate,
    /// End-session control message
    EndSession,
    /// Payment notification
    Payment,
    /// A story post
    Story,
    /// Reply to a story
    StoryReply,
    /// Group membership/metadata update
    GroupUpdate,
    /// A placeholder row recording a message we could not decrypt or
    /// could not understand
    Placeholder(PlaceholderKind),
}

/// Why a placeholder row was recorded instead of real content.
///
/// Placeholders let the UI render an explanatory state for messages that
/// failed protocol-level processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlaceholderKind {
    /// The envelope used an unsupported protocol version
    InvalidVersion,
    /// The envelope used a long-obsolete wire format
    LegacyVersion,
    /// The message required a newer client than ours
    UnsupportedData,
    /// Storage or cipher failure while persisting the decrypted content
    CorruptMessage,
    /// Peer-visible decryption failure (chat session error)
    DecryptionError,
}

impl fmt::Display for PlaceholderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl PlaceholderKind {
    /// Get as `&str`
    pub fn as_str(&self) -> &str {
        match self {
            Self::InvalidVersion => "invalid_version",
            Self::LegacyVersion => "legacy_version",
            Self::UnsupportedData => "unsupported_data",
            Self::CorruptMessage => "corrupt_message",
            Self::DecryptionError => "decryption_error",
        }
    }
}

impl FromStr for PlaceholderKind {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invalid_version" => Ok(Self::InvalidVersion),
            "legacy_version" => Ok(Self::LegacyVersion),
            "unsupported_data" => Ok(Self::UnsupportedData),
            "corrupt_message" => Ok(Self::CorruptMessage),
            "decryption_error" => Ok(Self::DecryptionError),
            _ => Err(MessageError::InvalidParameters(format!(
                "Invalid placeholder kind: {}",
                s
            ))),
        }
    }
}

impl Serialize for PlaceholderKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PlaceholderKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A reaction applied to a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    /// The message the reaction targets
    pub message: MessageId,
    /// Who reacted
    pub author: RecipientId,
    /// The reaction emoji
    pub emoji: String,
    /// When the reaction was sent (milliseconds)
    pub sent_timestamp_ms: u64,
    /// Whether this reaction replaces (removes) a previous one
    pub remove: bool,
}
