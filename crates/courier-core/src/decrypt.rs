//! The decryption unit.
//!
//! Takes one raw envelope and produces a classified [`DecryptionResult`]:
//! decrypted content, a failure state the processor knows how to record, or
//! a no-op. Never throws past its own boundary - every cipher failure is
//! returned as data. Side effects are limited to the protocol store plus
//! the follow-up jobs bundled into the result, which the caller enqueues
//! atomically with it.

use std::num::NonZeroUsize;

use lru::LruCache;

use courier_storage_traits::resend_log::types::ContentHint;
use courier_storage_traits::retry_receipts::types::PendingRetryReceipt;
use courier_storage_traits::{CourierStorageProvider, ProtocolAddress, RecipientId};

use crate::cipher::{CipherError, CipherErrorContext, CipherResult};
use crate::constant::DECRYPTION_ERROR_SENDERS;
use crate::content::{Content, EnvelopeMetadata, ErrorMetadata};
use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::Error;
use crate::jobs::{Job, JobChain};
use crate::util::now_ms;
use crate::Courier;

/// The outcome of decrypting one envelope.
///
/// Never persisted - immediately consumed by the content processor.
#[derive(Debug)]
pub enum DecryptionResult {
    /// Successfully decrypted content
    Success {
        /// The decrypted content
        content: Content,
        /// Metadata about the sender
        metadata: EnvelopeMetadata,
        /// The envelope's client-sent timestamp (milliseconds)
        client_timestamp_ms: u64,
        /// Jobs to enqueue together with processing this result
        follow_ups: Vec<JobChain>,
    },
    /// A classified failure that the processor records
    Error {
        /// The failure classification
        state: MessageState,
        /// Who the failure is attributed to
        metadata: ErrorMetadata,
        /// The envelope's client-sent timestamp (milliseconds)
        client_timestamp_ms: u64,
        /// Jobs to enqueue together with processing this result
        follow_ups: Vec<JobChain>,
    },
    /// Nothing to process; there may still be follow-up jobs
    Noop {
        /// Jobs to enqueue together with processing this result
        follow_ups: Vec<JobChain>,
    },
}

impl DecryptionResult {
    /// Jobs to enqueue together with this result
    pub fn follow_ups(&self) -> &[JobChain] {
        match self {
            Self::Success { follow_ups, .. }
            | Self::Error { follow_ups, .. }
            | Self::Noop { follow_ups } => follow_ups,
        }
    }
}

/// Classification of a failed decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageState {
    /// The envelope used an unsupported protocol version
    InvalidVersion,
    /// Retained only for stored-state compatibility; never produced
    CorruptMessage,
    /// Retained only for stored-state compatibility; never produced
    NoSession,
    /// The envelope used a long-obsolete wire format
    LegacyMessage,
    /// The message was already decrypted once
    DuplicateMessage,
    /// The message requires a newer client than ours
    UnsupportedDataMessage,
    /// A peer-visible decryption failure that should surface in the chat
    DecryptionError,
}

/// Per-sender decryption failure bookkeeping.
///
/// Bounds how many retry requests one misbehaving sender can extract from
/// us. Counts decay after a quiet period.
pub struct DecryptionErrorCounts {
    counts: LruCache<RecipientId, ErrorCount>,
}

struct ErrorCount {
    count: u32,
    last_error_ms: u64,
}

impl DecryptionErrorCounts {
    pub(crate) fn new() -> Self {
        Self {
            counts: LruCache::new(
                NonZeroUsize::new(DECRYPTION_ERROR_SENDERS).expect("cap must be non-zero"),
            ),
        }
    }

    /// Record an error from `sender` at `now`, returning the running count
    pub(crate) fn bump(&mut self, sender: RecipientId, now: u64, reset_age_ms: u64) -> u32 {
        let entry = self.counts.get_or_insert_mut(sender, || ErrorCount {
            count: 0,
            last_error_ms: 0,
        });

        if entry.count > 0 && now.saturating_sub(entry.last_error_ms) > reset_age_ms {
            tracing::info!(
                target: "courier_core::decrypt",
                %sender,
                "Resetting decryption error count after quiet period"
            );
            entry.count = 0;
        }

        entry.count += 1;
        entry.last_error_ms = now;
        entry.count
    }
}

impl<Storage> Courier<Storage>
where
    Storage: CourierStorageProvider,
{
    /// Decrypts an envelope and classifies the outcome.
    ///
    /// Ratchet state in the protocol store advances as a side effect. The
    /// returned follow-up jobs must be enqueued by the caller together with
    /// processing the result, so that a crash between the two cannot lose
    /// them relative to the stored state.
    pub fn decrypt(&self, envelope: &Envelope) -> Result<DecryptionResult, Error> {
        let me = self.storage().self_recipient()?;
        let my_service_id = me.require_service_id()?;

        let destination = match envelope.destination_service_id {
            Some(destination) => destination,
            None => {
                tracing::warn!(
                    target: "courier_core::decrypt",
                    "{} Missing destination address! Invalid message, ignoring.",
                    envelope.log_prefix()
                );
                return Ok(DecryptionResult::Noop { follow_ups: vec![] });
            }
        };

        if destination != my_service_id {
            tracing::warn!(
                target: "courier_core::decrypt",
                "{} Destination does not match our account! Invalid message, ignoring.",
                envelope.log_prefix()
            );
            return Ok(DecryptionResult::Noop { follow_ups: vec![] });
        }

        let mut follow_ups: Vec<JobChain> = Vec::new();

        if envelope.kind == EnvelopeKind::PrekeyBundle {
            tracing::info!(
                target: "courier_core::decrypt",
                "{} Prekey message. Scheduling a prekey refresh.",
                envelope.log_prefix()
            );
            follow_ups.push(JobChain::single(Job::RefreshPreKeys {
                force_rotation: false,
            }));
        }

        match self.cipher().decrypt(envelope) {
            Ok(Some(result)) => self.handle_cipher_success(envelope, result, follow_ups),
            Ok(None) => {
                tracing::warn!(
                    target: "courier_core::decrypt",
                    "{} Decryption produced no result",
                    envelope.log_prefix()
                );
                Ok(DecryptionResult::Noop { follow_ups })
            }
            Err(e) => self.classify_cipher_error(envelope, e, follow_ups),
        }
    }

    fn handle_cipher_success(
        &self,
        envelope: &Envelope,
        result: CipherResult,
        follow_ups: Vec<JobChain>,
    ) -> Result<DecryptionResult, Error> {
        let CipherResult { content, metadata } = result;

        tracing::debug!(
            target: "courier_core::decrypt",
            "{} Successfully decrypted the envelope (GUID {})",
            envelope.log_prefix(),
            envelope.server_guid
        );

        // Sender key material must be applied immediately: subsequent
        // envelopes in the same batch may be encrypted under it.
        if let Content::SenderKeyDistribution(skdm) = &content {
            let address =
                ProtocolAddress::new(metadata.source_service_id, metadata.source_device);
            tracing::info!(
                target: "courier_core::decrypt",
                "{} Processing sender key distribution for {}",
                envelope.log_prefix(),
                skdm.distribution_id
            );
            self.storage()
                .process_sender_key_distribution(&address, &skdm.message)?;
        }

        Ok(DecryptionResult::Success {
            content,
            metadata,
            client_timestamp_ms: envelope.client_timestamp_ms,
            follow_ups,
        })
    }

    fn classify_cipher_error(
        &self,
        envelope: &Envelope,
        error: CipherError,
        follow_ups: Vec<JobChain>,
    ) -> Result<DecryptionResult, Error> {
        let state = match &error {
            CipherError::SelfSend => {
                tracing::info!(
                    target: "courier_core::decrypt",
                    "[{}] Dropping sealed sender message from self",
                    envelope.client_timestamp_ms
                );
                return Ok(DecryptionResult::Noop { follow_ups });
            }
            CipherError::InvalidMetadata(reason) => {
                tracing::warn!(
                    target: "courier_core::decrypt",
                    "{} Invalid message structure: {}",
                    envelope.log_prefix(),
                    reason
                );
                return Ok(DecryptionResult::Noop { follow_ups });
            }
            CipherError::InvalidVersion(_) => MessageState::InvalidVersion,
            CipherError::LegacyMessage(_) => MessageState::LegacyMessage,
            CipherError::Duplicate(_) => MessageState::DuplicateMessage,
            CipherError::UnsupportedDataMessage(_) => MessageState::UnsupportedDataMessage,
            e if e.is_session_desync() => {
                return self.handle_session_desync(envelope, &error, follow_ups);
            }
            _ => unreachable!("all cipher error variants are classified"),
        };

        let ctx = error.context().expect("classified errors carry context");
        let sender = match ctx.sender {
            Some(sender) => sender,
            None => {
                // Cannot attribute, cannot safely surface
                tracing::warn!(
                    target: "courier_core::decrypt",
                    "{} {:?} failure without sender metadata. Ignoring.",
                    envelope.log_prefix(),
                    state
                );
                return Ok(DecryptionResult::Noop { follow_ups });
            }
        };

        tracing::warn!(
            target: "courier_core::decrypt",
            "{} Classified decryption failure: {:?}",
            envelope.log_prefix(),
            state
        );

        Ok(DecryptionResult::Error {
            state,
            metadata: ErrorMetadata {
                sender,
                sender_device: ctx.sender_device,
                group_id: ctx.group_id.clone(),
            },
            client_timestamp_ms: envelope.client_timestamp_ms,
            follow_ups,
        })
    }

    /// Session-desync failures self-heal: either through an automatic
    /// session reset (default) or, when retry receipts are enabled, by
    /// asking the sender to resend under a repaired session.
    fn handle_session_desync(
        &self,
        envelope: &Envelope,
        error: &CipherError,
        mut follow_ups: Vec<JobChain>,
    ) -> Result<DecryptionResult, Error> {
        let ctx = error.context().expect("desync errors carry context");

        let sender_service_id = match ctx.sender {
            Some(sender) => sender,
            None => {
                tracing::warn!(
                    target: "courier_core::decrypt",
                    "{} Session error without sender metadata. Ignoring.",
                    envelope.log_prefix()
                );
                return Ok(DecryptionResult::Noop { follow_ups });
            }
        };

        let sender = self.storage().resolve_service_id(&sender_service_id)?;

        if sender.is_self {
            tracing::warn!(
                target: "courier_core::decrypt",
                "{} Decryption error for a sync message! Enqueuing a session reset.",
                envelope.log_prefix()
            );
            follow_ups.push(JobChain::single(Job::AutomaticSessionReset {
                sender: sender.id,
                device: ctx.sender_device,
                timestamp_ms: envelope.client_timestamp_ms,
            }));
            return Ok(DecryptionResult::Noop { follow_ups });
        }

        if !self.config.retry_receipts {
            tracing::warn!(
                target: "courier_core::decrypt",
                "{} Session error. Enqueuing an automatic session reset.",
                envelope.log_prefix()
            );
            follow_ups.push(JobChain::single(Job::AutomaticSessionReset {
                sender: sender.id,
                device: ctx.sender_device,
                timestamp_ms: envelope.client_timestamp_ms,
            }));
            return Ok(DecryptionResult::Noop { follow_ups });
        }

        self.handle_desync_with_retry(envelope, ctx, sender.id, sender_service_id, &mut follow_ups)
    }

    fn handle_desync_with_retry(
        &self,
        envelope: &Envelope,
        ctx: &CipherErrorContext,
        sender: RecipientId,
        sender_service_id: courier_storage_traits::ServiceId,
        follow_ups: &mut Vec<JobChain>,
    ) -> Result<DecryptionResult, Error> {
        let received_ms = now_ms();
        let error_count = self.decryption_errors().lock().bump(
            sender,
            received_ms,
            self.config.decryption_error_reset_age_ms,
        );

        let over_budget = error_count > self.config.max_decryption_errors;
        if over_budget {
            tracing::warn!(
                target: "courier_core::decrypt",
                "{} Error number {} from {}, over the maximum. Not requesting a retry.",
                envelope.log_prefix(),
                error_count,
                sender
            );
        } else {
            tracing::warn!(
                target: "courier_core::decrypt",
                "{} Error number {} from {}. Requesting a retry.",
                envelope.log_prefix(),
                error_count,
                sender
            );

            let retry = Job::SendRetryReceipt {
                sender,
                group_id: ctx.group_id.clone(),
                original: ctx
                    .original_content
                    .clone()
                    .unwrap_or_else(|| envelope.payload.clone()),
            };

            // A failed prekey message means our prekey state is suspect;
            // rotate before asking for the retry.
            if envelope.kind == EnvelopeKind::PrekeyBundle {
                follow_ups.push(JobChain::of(vec![
                    Job::RefreshPreKeys {
                        force_rotation: true,
                    },
                    retry,
                ]));
            } else {
                follow_ups.push(JobChain::single(retry));
            }
        }

        match ctx.content_hint {
            ContentHint::Default => Ok(DecryptionResult::Error {
                state: MessageState::DecryptionError,
                metadata: ErrorMetadata {
                    sender: sender_service_id,
                    sender_device: ctx.sender_device,
                    group_id: ctx.group_id.clone(),
                },
                client_timestamp_ms: envelope.client_timestamp_ms,
                follow_ups: std::mem::take(follow_ups),
            }),
            ContentHint::Resendable if !over_budget => {
                // Remember the original receive time so the resend lands
                // where the failed message would have.
                let thread = match ctx.group_id.as_ref() {
                    Some(group_id) => match self.storage().find_group(group_id)? {
                        Some(group) => self.storage().thread_for_recipient(group.recipient)?,
                        None => {
                            tracing::warn!(
                                target: "courier_core::decrypt",
                                "{} No group found for {}! Not inserting a retry receipt.",
                                envelope.log_prefix(),
                                group_id
                            );
                            None
                        }
                    },
                    None => self.storage().thread_for_recipient(sender)?,
                };

                if let Some(thread) = thread {
                    self.storage().insert_pending_retry(PendingRetryReceipt {
                        author: sender,
                        device: ctx.sender_device,
                        sent_timestamp_ms: envelope.client_timestamp_ms,
                        received_timestamp_ms: received_ms,
                        thread,
                    })?;
                } else {
                    tracing::warn!(
                        target: "courier_core::decrypt",
                        "{} Thread does not already exist for {}! Not creating one for a retry receipt.",
                        envelope.log_prefix(),
                        sender
                    );
                }

                Ok(DecryptionResult::Noop {
                    follow_ups: std::mem::take(follow_ups),
                })
            }
            _ => Ok(DecryptionResult::Noop {
                follow_ups: std::mem::take(follow_ups),
            }),
        }
    }
}
