//! Decrypted message content.
//!
//! Content is a closed sum type constructed once by the cipher at decode
//! time and matched exhaustively by the processor. Optional wire fields
//! collapse into variants here so the compiler enforces handling of each
//! shape.

use serde::{Deserialize, Serialize};

use courier_storage_traits::groups::types::GroupVersion;
use courier_storage_traits::protocol::types::RatchetKey;
use courier_storage_traits::secret::Secret;
use courier_storage_traits::{DeviceId, DistributionId, GroupId, ServiceId};

/// Metadata about the sender of a successfully decrypted envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    /// The sender's service id (known after decryption even for sealed
    /// sender)
    pub source_service_id: ServiceId,
    /// The sender's device id
    pub source_device: DeviceId,
    /// The account the envelope was addressed to
    pub destination_service_id: ServiceId,
    /// Whether the envelope arrived sealed (sender hidden from the server)
    pub sealed_sender: bool,
    /// The group the content addressed, when the cipher could extract one
    pub group_id: Option<GroupId>,
}

/// Metadata attached to a classified decryption failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMetadata {
    /// The sender the failure is attributed to
    pub sender: ServiceId,
    /// The sender's device id
    pub sender_device: DeviceId,
    /// The group the failed message addressed, when known
    pub group_id: Option<GroupId>,
}

/// A decrypted logical message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Content {
    /// A chat message
    Data(DataMessage),
    /// A message from another device of our own account
    Sync(SyncMessage),
    /// Call signaling
    Call(CallMessage),
    /// A delivery/read acknowledgment from a peer
    Receipt(ReceiptMessage),
    /// A typing indicator
    Typing(TypingMessage),
    /// A story post
    Story(StoryMessage),
    /// A peer telling us it failed to decrypt something we sent
    RetryReceipt(DecryptionErrorMessage),
    /// Sender key material for a shared-group channel
    SenderKeyDistribution(SenderKeyDistributionMessage),
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    /// The sender's client-side timestamp (milliseconds)
    pub sent_timestamp_ms: u64,
    /// The group this message addresses, or `None` for a 1:1 message
    pub group: Option<GroupContext>,
    /// A fresh copy of the sender's profile key, when attached
    pub profile_key: Option<Secret<[u8; 32]>>,
    /// Expiry the conversation should apply to this message
    pub expires_in_ms: Option<u64>,
    /// What the message carries
    pub payload: DataPayload,
}

impl DataMessage {
    /// Whether this is an ordinary content message, as opposed to a
    /// control message (updates, expiration changes, end-session)
    pub fn is_content_message(&self) -> bool {
        matches!(
            self.payload,
            DataPayload::Text { .. }
                | DataPayload::Media { .. }
                | DataPayload::StoryReply { .. }
        )
    }

    /// Whether this message is a structural update for a new-style group
    pub fn is_group_v2_update(&self) -> bool {
        self.group
            .as_ref()
            .map(|g| g.version == GroupVersion::V2 && g.has_signed_change)
            .unwrap_or(false)
    }

    /// Whether this message is a legacy-group leave notice
    pub fn is_legacy_group_leave(&self) -> bool {
        matches!(self.payload, DataPayload::LegacyGroupUpdate { leaving: true })
    }
}

/// What a chat message carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataPayload {
    /// Plain text
    Text {
        /// The message body
        body: String,
    },
    /// Media: attachments, stickers, quotes, link previews, mentions
    Media {
        /// Optional caption text
        body: Option<String>,
        /// Number of attachments carried
        attachment_count: u32,
    },
    /// A reaction to an existing message
    Reaction(ReactionPayload),
    /// The sender deleting one of their own earlier messages
    RemoteDelete {
        /// Client-sent timestamp of the message to delete
        target_sent_timestamp_ms: u64,
    },
    /// A payment notification
    Payment {
        /// Optional note attached to the payment
        note: Option<String>,
    },
    /// A disappearing-message timer change
    ExpirationUpdate,
    /// The sender requesting a session teardown
    EndSession,
    /// A legacy group membership update
    LegacyGroupUpdate {
        /// Whether the sender is leaving the group
        leaving: bool,
    },
    /// A group call started or its participants changed
    GroupCallUpdate {
        /// Identifies the call era being announced
        era_id: Option<String>,
    },
    /// A reply to a story
    StoryReply {
        /// Client-sent timestamp of the story being replied to
        story_sent_timestamp_ms: u64,
        /// The story's author
        story_author: ServiceId,
        /// The reply body
        body: String,
    },
}

/// A reaction to an existing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionPayload {
    /// The reaction emoji
    pub emoji: String,
    /// Whether this removes the sender's previous reaction
    pub remove: bool,
    /// Who authored the message being reacted to
    pub target_author: ServiceId,
    /// Client-sent timestamp of the message being reacted to
    pub target_sent_timestamp_ms: u64,
}

/// The group addressing of a chat or story message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupContext {
    /// The group id
    pub id: GroupId,
    /// Which generation of the group protocol this context uses
    pub version: GroupVersion,
    /// The group master key for new-style groups
    pub master_key: Option<Secret<[u8; 32]>>,
    /// The group revision the sender was at
    pub revision: u32,
    /// Whether the context carries a signed structural change
    pub has_signed_change: bool,
}

/// A message from another device of our own account.
///
/// Payload formats are owned by the sync subsystem; the pipeline only
/// routes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// The serialized sync payload
    pub payload: Vec<u8>,
}

/// Call signaling.
///
/// Signaling internals are owned by the calling subsystem; the pipeline
/// checks device targeting and routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMessage {
    /// The device the message targets, when the sender pinned one
    pub destination_device_id: Option<DeviceId>,
    /// The serialized signaling payload
    pub payload: Vec<u8>,
}

/// A delivery/read acknowledgment from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptMessage {
    /// What kind of acknowledgment this is
    pub kind: ReceiptKind,
    /// Client-sent timestamps of the acknowledged messages
    pub timestamps: Vec<u64>,
}

/// Acknowledgment kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReceiptKind {
    /// The message reached the peer's device
    Delivery,
    /// The peer viewed the message
    Read,
}

/// A typing indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingMessage {
    /// Started or stopped
    pub action: TypingAction,
    /// The group conversation the indicator applies to, or `None` for 1:1
    pub group_id: Option<GroupId>,
}

/// Typing indicator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TypingAction {
    /// The peer started typing
    Started,
    /// The peer stopped typing
    Stopped,
}

/// A story post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryMessage {
    /// The sender's client-side timestamp (milliseconds)
    pub sent_timestamp_ms: u64,
    /// The group the story was posted to, or `None` for a distribution list
    pub group: Option<GroupContext>,
    /// Optional text body
    pub body: Option<String>,
    /// Whether replies are allowed
    pub allows_replies: bool,
}

/// A peer's signal that it failed to decrypt a message we sent and is
/// requesting a resend or session repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionErrorMessage {
    /// The device of ours the failure occurred on
    pub device_id: DeviceId,
    /// Client-sent timestamp of the message that failed to decrypt
    pub sent_timestamp_ms: u64,
    /// The ratchet key of the session the peer failed on. Present for
    /// pairwise failures, absent for shared-group (sender key) failures.
    pub ratchet_key: Option<RatchetKey>,
}

/// Sender key material for a shared-group channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyDistributionMessage {
    /// The distribution the key belongs to
    pub distribution_id: DistributionId,
    /// The serialized distribution message
    pub message: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_message(payload: DataPayload, group: Option<GroupContext>) -> DataMessage {
        DataMessage {
            sent_timestamp_ms: 1000,
            group,
            profile_key: None,
            expires_in_ms: None,
            payload,
        }
    }

    fn v2_context(signed_change: bool) -> GroupContext {
        GroupContext {
            id: GroupId::from_slice(&[1, 2, 3]),
            version: GroupVersion::V2,
            master_key: Some(Secret::new([0u8; 32])),
            revision: 5,
            has_signed_change: signed_change,
        }
    }

    #[test]
    fn test_is_content_message() {
        let text = data_message(
            DataPayload::Text {
                body: "hi".to_string(),
            },
            None,
        );
        assert!(text.is_content_message());

        let expire = data_message(DataPayload::ExpirationUpdate, None);
        assert!(!expire.is_content_message());

        let update = data_message(DataPayload::LegacyGroupUpdate { leaving: false }, None);
        assert!(!update.is_content_message());
    }

    #[test]
    fn test_is_group_v2_update() {
        let plain = data_message(
            DataPayload::Text {
                body: "hi".to_string(),
            },
            Some(v2_context(false)),
        );
        assert!(!plain.is_group_v2_update());

        let update = data_message(
            DataPayload::Text {
                body: "hi".to_string(),
            },
            Some(v2_context(true)),
        );
        assert!(update.is_group_v2_update());
    }

    #[test]
    fn test_is_legacy_group_leave() {
        let leave = data_message(DataPayload::LegacyGroupUpdate { leaving: true }, None);
        assert!(leave.is_legacy_group_leave());

        let join = data_message(DataPayload::LegacyGroupUpdate { leaving: false }, None);
        assert!(!join.is_legacy_group_leave());
    }

    #[test]
    fn test_content_serialization() {
        let content = Content::Receipt(ReceiptMessage {
            kind: ReceiptKind::Delivery,
            timestamps: vec![1, 2, 3],
        });

        let json = serde_json::to_string(&content).unwrap();
        let back: Content = serde_json::from_str(&json).unwrap();
        assert_eq!(back, content);
    }
}
