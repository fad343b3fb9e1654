//! Retry receipt handling: a peer failed to decrypt something we sent.
//!
//! Branches on whether the peer supplied a ratchet key. With one, this is
//! a pairwise session failure: archive the session when the key matches
//! and resend from the log (or complete the reset with a null message).
//! Without one, this is a shared-group failure: forget that we shared our
//! sender key with the peer and either resend from the log or send a fresh
//! distribution message.

use courier_storage_traits::groups::types::GroupVersion;
use courier_storage_traits::recipients::types::Recipient;
use courier_storage_traits::resend_log::types::MessageLogEntry;
use courier_storage_traits::{CourierStorageProvider, ProtocolAddress};

use crate::content::{DecryptionErrorMessage, EnvelopeMetadata};
use crate::error::Error;
use crate::jobs::Job;
use crate::Courier;

impl<Storage> Courier<Storage>
where
    Storage: CourierStorageProvider,
{
    pub(crate) fn handle_retry_receipt(
        &self,
        sender: &Recipient,
        metadata: &EnvelopeMetadata,
        message: &DecryptionErrorMessage,
        client_timestamp_ms: u64,
    ) -> Result<(), Error> {
        if message.device_id != self.config.local_device {
            tracing::info!(
                target: "courier_core::processor",
                "[{}] [RetryReceipt] Targets a linked device ({}). Ignoring.",
                client_timestamp_ms,
                message.device_id
            );
            return Ok(());
        }

        let sent_timestamp = message.sent_timestamp_ms;
        tracing::warn!(
            target: "courier_core::processor",
            "[{}] [RetryReceipt] Received a retry receipt from {} ({}.{}) for message with timestamp {}.",
            client_timestamp_ms,
            sender.id,
            metadata.source_service_id,
            metadata.source_device,
            sent_timestamp
        );

        if sender.service_id.is_none() {
            tracing::warn!(
                target: "courier_core::processor",
                "[{}] [RetryReceipt] Requester {} somehow has no service id! timestamp: {}",
                client_timestamp_ms,
                sender.id,
                sent_timestamp
            );
            return Ok(());
        }

        let log_entry =
            self.storage()
                .find_log_entry(sender.id, metadata.source_device, sent_timestamp)?;

        if message.ratchet_key.is_some() {
            self.handle_individual_retry(sender, metadata, message, log_entry, client_timestamp_ms)
        } else {
            self.handle_sender_key_retry(sender, metadata, message, log_entry, client_timestamp_ms)
        }
    }

    fn handle_individual_retry(
        &self,
        requester: &Recipient,
        metadata: &EnvelopeMetadata,
        message: &DecryptionErrorMessage,
        log_entry: Option<MessageLogEntry>,
        client_timestamp_ms: u64,
    ) -> Result<(), Error> {
        let mut archived_session = false;

        let address = ProtocolAddress::new(
            requester.require_service_id()?,
            metadata.source_device,
        );

        if let Some(ratchet_key) = &message.ratchet_key {
            if let Some(session) = self.storage().load_session(&address)? {
                if session.current_ratchet_key_matches(ratchet_key) {
                    tracing::warn!(
                        target: "courier_core::processor",
                        "[{}] [RetryReceipt-I] Ratchet key matches. Archiving the session.",
                        client_timestamp_ms
                    );
                    self.storage().archive_session(&address)?;
                    archived_session = true;
                }
            }
        }

        if let Some(entry) = log_entry {
            tracing::warn!(
                target: "courier_core::processor",
                "[{}] [RetryReceipt-I] Found an entry in the resend log. Resending.",
                client_timestamp_ms
            );
            self.jobs().add(Job::ResendMessage {
                recipient: requester.id,
                sent_timestamp_ms: entry.sent_timestamp_ms,
                content: entry.content,
                content_hint: entry.content_hint,
                urgent: entry.urgent,
                group_id: None,
                distribution_id: None,
            });
        } else if archived_session {
            tracing::warn!(
                target: "courier_core::processor",
                "[{}] [RetryReceipt-I] No resend log entry, but we archived the session, so we're sending a null message to complete the reset.",
                client_timestamp_ms
            );
            self.jobs().add(Job::SendNullMessage {
                recipient: requester.id,
            });
        } else {
            tracing::warn!(
                target: "courier_core::processor",
                "[{}] [RetryReceipt-I] Could not find an entry in the resend log. Skipping.",
                client_timestamp_ms
            );
        }

        Ok(())
    }

    fn handle_sender_key_retry(
        &self,
        requester: &Recipient,
        metadata: &EnvelopeMetadata,
        message: &DecryptionErrorMessage,
        log_entry: Option<MessageLogEntry>,
        client_timestamp_ms: u64,
    ) -> Result<(), Error> {
        let sent_timestamp = message.sent_timestamp_ms;

        // Resolve the outbound message the peer is talking about: through
        // the log entry's back-reference when we have one, otherwise the
        // most recent self-authored message at that timestamp
        let related = match log_entry.as_ref().and_then(|e| e.related_message_id) {
            Some(message_id) => self.storage().find_message(message_id)?,
            None => self
                .storage()
                .find_own_message_by_sent_timestamp(sent_timestamp)?,
        };

        let related = match related {
            Some(related) => related,
            None => {
                tracing::warn!(
                    target: "courier_core::processor",
                    "[{}] [RetryReceipt-SK] The related message could not be found! Skipping.",
                    client_timestamp_ms
                );
                return Ok(());
            }
        };

        let thread_recipient = match self.storage().thread_recipient(related.thread)? {
            Some(recipient) => recipient,
            None => {
                tracing::warn!(
                    target: "courier_core::processor",
                    "[{}] [RetryReceipt-SK] Could not find a thread recipient! Skipping.",
                    client_timestamp_ms
                );
                return Ok(());
            }
        };

        let group = match self.storage().find_group_by_recipient(thread_recipient)? {
            Some(group) if group.version == GroupVersion::V2 => group,
            _ => {
                tracing::warn!(
                    target: "courier_core::processor",
                    "[{}] [RetryReceipt-SK] Thread is not a V2 group! Skipping.",
                    client_timestamp_ms
                );
                return Ok(());
            }
        };

        let distribution_id = self.storage().get_or_create_distribution_id(&group.id)?;

        let requester_address = ProtocolAddress::new(
            requester.require_service_id()?,
            metadata.source_device,
        );
        self.storage()
            .clear_sender_key_shared_with(&distribution_id, &[requester_address])?;

        if let Some(entry) = log_entry {
            tracing::warn!(
                target: "courier_core::processor",
                "[{}] [RetryReceipt-SK] Found a resend log entry for {} ({}) with timestamp {}. Scheduling a resend.",
                client_timestamp_ms,
                requester.id,
                requester_address,
                sent_timestamp
            );
            self.jobs().add(Job::ResendMessage {
                recipient: requester.id,
                sent_timestamp_ms: entry.sent_timestamp_ms,
                content: entry.content,
                content_hint: entry.content_hint,
                urgent: entry.urgent,
                group_id: Some(group.id.clone()),
                distribution_id: Some(distribution_id),
            });
        } else if group.members.contains(&requester.id) {
            tracing::warn!(
                target: "courier_core::processor",
                "[{}] [RetryReceipt-SK] No resend log entry for {} ({}) with timestamp {}. Scheduling a fresh sender key distribution.",
                client_timestamp_ms,
                requester.id,
                requester_address,
                sent_timestamp
            );
            self.jobs().add(Job::SendSenderKeyDistribution {
                recipient: requester.id,
                thread_recipient,
            });
        } else {
            tracing::warn!(
                target: "courier_core::processor",
                "[{}] [RetryReceipt-SK] Requester is no longer a group member. Skipping.",
                client_timestamp_ms
            );
        }

        Ok(())
    }
}
