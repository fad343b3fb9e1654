//! The opaque cipher capability.
//!
//! The pipeline does not define the ratchet's wire bytes; it consumes a
//! `Cipher` that turns envelopes into content and classifies failures into
//! a closed exception taxonomy. All cipher side effects are limited to the
//! protocol store, which advances per-sender ratchet state.

use thiserror::Error;

use courier_storage_traits::resend_log::types::ContentHint;
use courier_storage_traits::{DeviceId, GroupId, ServiceId};

use crate::content::{Content, EnvelopeMetadata};
use crate::envelope::Envelope;

/// A successfully decrypted envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherResult {
    /// The decrypted content
    pub content: Content,
    /// Metadata about the sender
    pub metadata: EnvelopeMetadata,
}

/// Context attached to a classified cipher failure.
///
/// The sender is optional: exceptions that cannot be attributed to a sender
/// cannot safely be surfaced and are swallowed by the decryption unit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CipherErrorContext {
    /// The sender the failure is attributed to, when known
    pub sender: Option<ServiceId>,
    /// The sender's device
    pub sender_device: DeviceId,
    /// The group the failed message addressed, when recoverable from the
    /// sealed metadata
    pub group_id: Option<GroupId>,
    /// The content hint the failed ciphertext carried
    pub content_hint: ContentHint,
    /// The original ciphertext, for building a retry request
    pub original_content: Option<Vec<u8>>,
}

/// The closed set of failures a cipher can produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// The envelope used an unsupported protocol version
    #[error("invalid protocol version")]
    InvalidVersion(CipherErrorContext),

    /// The ciphertext could not be decrypted on the current session
    #[error("invalid message")]
    InvalidMessage(CipherErrorContext),

    /// A key in the message was invalid
    #[error("invalid key")]
    InvalidKey(CipherErrorContext),

    /// The message referenced an unknown prekey id
    #[error("invalid key id")]
    InvalidKeyId(CipherErrorContext),

    /// The sender's identity key changed and is not trusted
    #[error("untrusted identity")]
    UntrustedIdentity(CipherErrorContext),

    /// No session exists with the sender's device
    #[error("no session")]
    NoSession(CipherErrorContext),

    /// The envelope used a long-obsolete wire format
    #[error("legacy message version")]
    LegacyMessage(CipherErrorContext),

    /// The message was already decrypted once
    #[error("duplicate message")]
    Duplicate(CipherErrorContext),

    /// The message requires a newer client than ours
    #[error("unsupported data message")]
    UnsupportedDataMessage(CipherErrorContext),

    /// A sealed-sender message we sent to ourselves came back
    #[error("self send")]
    SelfSend,

    /// The envelope structure itself was malformed
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
}

impl CipherError {
    /// The failure context, for variants that carry one
    pub fn context(&self) -> Option<&CipherErrorContext> {
        match self {
            Self::InvalidVersion(ctx)
            | Self::InvalidMessage(ctx)
            | Self::InvalidKey(ctx)
            | Self::InvalidKeyId(ctx)
            | Self::UntrustedIdentity(ctx)
            | Self::NoSession(ctx)
            | Self::LegacyMessage(ctx)
            | Self::Duplicate(ctx)
            | Self::UnsupportedDataMessage(ctx) => Some(ctx),
            Self::SelfSend | Self::InvalidMetadata(_) => None,
        }
    }

    /// Whether this failure indicates a desynchronized session that will
    /// self-heal through an automatic reset or retry request
    pub fn is_session_desync(&self) -> bool {
        matches!(
            self,
            Self::InvalidMessage(_)
                | Self::InvalidKey(_)
                | Self::InvalidKeyId(_)
                | Self::UntrustedIdentity(_)
                | Self::NoSession(_)
        )
    }
}

/// Stateful end-to-end decryption of envelopes.
///
/// `Ok(None)` means the envelope decrypted to nothing actionable (e.g. a
/// keepalive). Implementations advance ratchet state in the protocol store
/// as a side effect; callers must hold the processor lock so that state
/// advances in envelope order.
pub trait EnvelopeCipher: Send + Sync {
    /// Decrypt one envelope
    fn decrypt(&self, envelope: &Envelope) -> Result<Option<CipherResult>, CipherError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_accessor() {
        let ctx = CipherErrorContext {
            sender: Some(ServiceId::from_bytes([1u8; 16])),
            ..Default::default()
        };

        assert!(CipherError::NoSession(ctx.clone()).context().is_some());
        assert!(CipherError::SelfSend.context().is_none());
        assert!(
            CipherError::InvalidMetadata("oops".to_string())
                .context()
                .is_none()
        );
    }

    #[test]
    fn test_session_desync_classification() {
        let ctx = CipherErrorContext::default();

        assert!(CipherError::NoSession(ctx.clone()).is_session_desync());
        assert!(CipherError::InvalidKey(ctx.clone()).is_session_desync());
        assert!(!CipherError::Duplicate(ctx.clone()).is_session_desync());
        assert!(!CipherError::LegacyMessage(ctx).is_session_desync());
        assert!(!CipherError::SelfSend.is_session_desync());
    }
}
