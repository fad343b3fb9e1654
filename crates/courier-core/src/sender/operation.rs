//! Send operations.
//!
//! The closed set of things the fan-out sender knows how to send. Each
//! variant answers the same four questions: what content hint it carries,
//! when it was sent, whether it belongs in the resend log, and which
//! stored message it originates from.

use serde::{Deserialize, Serialize};

use courier_storage_traits::resend_log::types::ContentHint;
use courier_storage_traits::MessageId;

use crate::content::{CallMessage, DataMessage, StoryMessage, TypingMessage};

/// One outbound send, by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendOperation {
    /// A chat message
    Data {
        /// The message
        message: DataMessage,
        /// The hint receivers use on decryption failure
        content_hint: ContentHint,
        /// The stored message this send originates from. Present exactly
        /// when the send is resendable.
        related_message_id: Option<MessageId>,
        /// Whether the send is logged for exact resend
        resendable: bool,
        /// Whether the send is urgent
        urgent: bool,
    },
    /// A typing indicator. Never logged; has no related message.
    Typing {
        /// The indicator
        message: TypingMessage,
        /// Client-side sent timestamp (milliseconds)
        timestamp_ms: u64,
    },
    /// Call signaling. Never logged; has no related message.
    Call {
        /// The signaling payload
        message: CallMessage,
        /// Client-side sent timestamp (milliseconds)
        timestamp_ms: u64,
        /// Whether the send is urgent
        urgent: bool,
    },
    /// A story post, group or distribution-list addressed
    Story {
        /// The story
        message: StoryMessage,
        /// The stored message this send originates from, when logged
        related_message_id: Option<MessageId>,
    },
}

impl SendOperation {
    /// A resendable chat message send. Resendable sends must reference
    /// their stored message.
    pub fn resendable_data(
        message: DataMessage,
        content_hint: ContentHint,
        related_message_id: MessageId,
        urgent: bool,
    ) -> Self {
        Self::Data {
            message,
            content_hint,
            related_message_id: Some(related_message_id),
            resendable: true,
            urgent,
        }
    }

    /// An unresendable chat message send
    pub fn unresendable_data(message: DataMessage, content_hint: ContentHint, urgent: bool) -> Self {
        Self::Data {
            message,
            content_hint,
            related_message_id: None,
            resendable: false,
            urgent,
        }
    }

    /// The content hint receivers use on decryption failure
    pub fn content_hint(&self) -> ContentHint {
        match self {
            Self::Data { content_hint, .. } => *content_hint,
            Self::Typing { .. } => ContentHint::Implicit,
            Self::Call { .. } => ContentHint::Default,
            Self::Story { .. } => ContentHint::Resendable,
        }
    }

    /// Client-side sent timestamp (milliseconds)
    pub fn sent_timestamp_ms(&self) -> u64 {
        match self {
            Self::Data { message, .. } => message.sent_timestamp_ms,
            Self::Typing { timestamp_ms, .. } => *timestamp_ms,
            Self::Call { timestamp_ms, .. } => *timestamp_ms,
            Self::Story { message, .. } => message.sent_timestamp_ms,
        }
    }

    /// Whether this send is recorded in the resend log
    pub fn should_log(&self) -> bool {
        match self {
            Self::Data { resendable, .. } => *resendable,
            Self::Typing { .. } => false,
            Self::Call { .. } => false,
            Self::Story {
                related_message_id, ..
            } => related_message_id.is_some(),
        }
    }

    /// The stored message this send originates from.
    ///
    /// # Panics
    ///
    /// Panics for operations that have none; asking is a programming
    /// error, not a runtime condition.
    pub fn related_message_id(&self) -> MessageId {
        match self {
            Self::Data {
                related_message_id: Some(id),
                ..
            } => *id,
            Self::Story {
                related_message_id: Some(id),
                ..
            } => *id,
            Self::Data {
                related_message_id: None,
                ..
            } => panic!("unresendable data send has no related message id"),
            Self::Story {
                related_message_id: None,
                ..
            } => panic!("unlogged story send has no related message id"),
            Self::Typing { .. } | Self::Call { .. } => {
                panic!("typing/call sends have no related message id")
            }
        }
    }

    /// Whether the send is urgent
    pub fn is_urgent(&self) -> bool {
        match self {
            Self::Data { urgent, .. } => *urgent,
            Self::Typing { .. } => false,
            Self::Call { urgent, .. } => *urgent,
            Self::Story { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::content::{DataPayload, TypingAction};

    use super::*;

    fn data_message() -> DataMessage {
        DataMessage {
            sent_timestamp_ms: 4200,
            group: None,
            profile_key: None,
            expires_in_ms: None,
            payload: DataPayload::Text {
                body: "hello".to_string(),
            },
        }
    }

    #[test]
    fn test_data_operation_logging() {
        let resendable = SendOperation::resendable_data(
            data_message(),
            ContentHint::Resendable,
            MessageId::new(7),
            true,
        );
        assert!(resendable.should_log());
        assert_eq!(resendable.related_message_id(), MessageId::new(7));
        assert_eq!(resendable.sent_timestamp_ms(), 4200);
        assert!(resendable.is_urgent());

        let unresendable =
            SendOperation::unresendable_data(data_message(), ContentHint::Default, false);
        assert!(!unresendable.should_log());
    }

    #[test]
    fn test_typing_operation() {
        let typing = SendOperation::Typing {
            message: TypingMessage {
                action: TypingAction::Started,
                group_id: None,
            },
            timestamp_ms: 100,
        };

        assert_eq!(typing.content_hint(), ContentHint::Implicit);
        assert!(!typing.should_log());
        assert!(!typing.is_urgent());
    }

    #[test]
    #[should_panic(expected = "typing/call sends have no related message id")]
    fn test_typing_related_message_panics() {
        let typing = SendOperation::Typing {
            message: TypingMessage {
                action: TypingAction::Stopped,
                group_id: None,
            },
            timestamp_ms: 100,
        };
        let _ = typing.related_message_id();
    }
}
