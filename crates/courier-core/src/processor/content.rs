//! Dispatch of successfully decrypted content.
//!
//! Resolves the sender, applies the ignore-filter, dispatches by content
//! variant, and runs the post-dispatch follow-ups: group recovery, profile
//! key updates, receipt jobs, early-cache replay, and pending-retry
//! bookkeeping.

use courier_storage_traits::groups::types::{Group, GroupVersion};
use courier_storage_traits::recipients::types::Recipient;
use courier_storage_traits::retry_receipts::types::PendingRetryReceipt;
use courier_storage_traits::{CourierStorageProvider, RecipientId};

use crate::content::{
    Content, DataMessage, EnvelopeMetadata, GroupContext, ReceiptKind, ReceiptMessage,
    StoryMessage, TypingAction, TypingMessage,
};
use crate::error::Error;
use crate::jobs::Job;
use crate::processor::early_cache::EarlyEntry;
use crate::util::now_ms;
use crate::Courier;

/// Outcome of the ignore-filter.
enum ContentFilter {
    /// Process normally
    Process,
    /// Ignore: no state mutated, no error recorded
    Ignore(&'static str),
    /// The message referenced a group unknown locally; skip it but trigger
    /// group-metadata recovery
    RecoverGroup(GroupContext),
}

impl<Storage> Courier<Storage>
where
    Storage: CourierStorageProvider,
{
    pub(crate) fn handle_content(
        &self,
        content: Content,
        metadata: EnvelopeMetadata,
        client_timestamp_ms: u64,
        server_delivered_timestamp_ms: u64,
        processing_early_content: bool,
    ) -> Result<(), Error> {
        // High-trust resolution: this address is bound to the recipient
        // going forward
        let sender = self
            .storage()
            .resolve_service_id(&metadata.source_service_id)?;

        // Acknowledgment receipts update counters, prune the resend log,
        // and nothing else
        if let Content::Receipt(receipt) = &content {
            return self.handle_receipt(&sender, receipt);
        }

        match self.check_ignore(&content, &sender)? {
            ContentFilter::Process => {}
            ContentFilter::Ignore(reason) => {
                tracing::info!(
                    target: "courier_core::processor",
                    "[{}] Ignoring message: {}",
                    client_timestamp_ms,
                    reason
                );
                return Ok(());
            }
            ContentFilter::RecoverGroup(context) => {
                tracing::info!(
                    target: "courier_core::processor",
                    "[{}] Message for unknown group {}. Triggering recovery.",
                    client_timestamp_ms,
                    context.id
                );
                self.recover_group(&context, &sender)?;
                return Ok(());
            }
        }

        let pending = self
            .storage()
            .find_pending_retry(sender.id, client_timestamp_ms)?;
        let received_timestamp_ms =
            self.receive_time_for(pending.as_ref(), &content, &sender, client_timestamp_ms)?;

        tracing::info!(
            target: "courier_core::processor",
            "[{}] Beginning message processing. Sender: {} ({}.{})",
            client_timestamp_ms,
            sender.id,
            metadata.source_service_id,
            metadata.source_device
        );

        match &content {
            Content::Data(message) => {
                self.handle_data_content(
                    &sender,
                    &metadata,
                    message,
                    client_timestamp_ms,
                    server_delivered_timestamp_ms,
                    received_timestamp_ms,
                    processing_early_content,
                    &content,
                )?;
            }
            Content::Sync(message) => {
                tracing::info!(
                    target: "courier_core::processor",
                    "[{}] Got sync message from our device {}",
                    client_timestamp_ms,
                    metadata.source_device
                );
                self.jobs().add(Job::ProcessSyncMessage {
                    sender_device: metadata.source_device,
                    message: message.clone(),
                });
            }
            Content::Call(message) => {
                tracing::info!(
                    target: "courier_core::processor",
                    "[{}] Got call message...",
                    client_timestamp_ms
                );

                if let Some(destination) = message.destination_device_id {
                    if destination != self.config.local_device {
                        tracing::info!(
                            target: "courier_core::processor",
                            "[{}] Ignoring call message that is not for this device! intended: {}, this: {}",
                            client_timestamp_ms,
                            destination,
                            self.config.local_device
                        );
                        return Ok(());
                    }
                }

                self.jobs().add(Job::DispatchCallMessage {
                    sender: sender.id,
                    sender_device: metadata.source_device,
                    message: message.clone(),
                });
            }
            Content::Typing(message) => {
                self.handle_typing(&sender, &metadata, message, client_timestamp_ms)?;
            }
            Content::Story(message) => {
                self.handle_story(
                    &sender,
                    &metadata,
                    message,
                    client_timestamp_ms,
                    received_timestamp_ms,
                )?;
            }
            Content::RetryReceipt(message) => {
                self.handle_retry_receipt(&sender, &metadata, message, client_timestamp_ms)?;
            }
            Content::SenderKeyDistribution(_) => {
                // Already applied by the decryption unit; nothing to store
            }
            Content::Receipt(_) => unreachable!("receipts return early"),
        }

        // Replay dependent content that was waiting on this message
        if !processing_early_content {
            if let Some(entries) = self.early_cache().retrieve(sender.id, client_timestamp_ms) {
                tracing::info!(
                    target: "courier_core::processor",
                    "[{}] Found {} dependent item(s) that were retrieved earlier. Processing.",
                    client_timestamp_ms,
                    entries.len()
                );
                for entry in entries {
                    self.handle_content(
                        entry.content,
                        entry.metadata,
                        entry.client_timestamp_ms,
                        entry.server_delivered_timestamp_ms,
                        true,
                    )?;
                }
            }
        }

        if let Some(pending) = pending {
            tracing::warn!(
                target: "courier_core::processor",
                "[{}] Pending retry was processed. Deleting.",
                client_timestamp_ms
            );
            self.storage()
                .delete_pending_retry(pending.author, pending.sent_timestamp_ms)?;
        }

        Ok(())
    }

    /// Data-message dispatch with per-message failure degradation: a
    /// storage failure records a corrupt-message placeholder instead of
    /// aborting the batch; a bad group id skips this message only.
    #[allow(clippy::too_many_arguments)]
    fn handle_data_content(
        &self,
        sender: &Recipient,
        metadata: &EnvelopeMetadata,
        message: &DataMessage,
        client_timestamp_ms: u64,
        server_delivered_timestamp_ms: u64,
        received_timestamp_ms: u64,
        processing_early_content: bool,
        content: &Content,
    ) -> Result<(), Error> {
        let early_entry = if processing_early_content {
            None
        } else {
            Some(EarlyEntry {
                content: content.clone(),
                metadata: metadata.clone(),
                client_timestamp_ms,
                server_delivered_timestamp_ms,
            })
        };

        let inserted = match self.process_data_message(
            sender,
            metadata,
            message,
            client_timestamp_ms,
            received_timestamp_ms,
            early_entry,
        ) {
            Ok(inserted) => inserted,
            Err(Error::BadGroupId(id)) => {
                tracing::warn!(
                    target: "courier_core::processor",
                    "[{}] Bad group id {}! Skipping message.",
                    client_timestamp_ms,
                    id
                );
                return Ok(());
            }
            Err(Error::Storage(e)) => {
                tracing::warn!(
                    target: "courier_core::processor",
                    "[{}] Storage failure while processing message: {}. Recording a corrupt message placeholder.",
                    client_timestamp_ms,
                    e
                );
                self.insert_error_placeholder(
                    sender,
                    metadata.source_device,
                    None,
                    client_timestamp_ms,
                    courier_storage_traits::messages::types::PlaceholderKind::CorruptMessage,
                )?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Some(inserted) = inserted {
            tracing::debug!(
                target: "courier_core::processor",
                "[{}] Inserted message {}. Enqueuing a delivery receipt.",
                client_timestamp_ms,
                inserted
            );
            self.jobs().add(Job::SendDeliveryReceipt {
                recipient: sender.id,
                sent_timestamp_ms: client_timestamp_ms,
            });
        } else if !metadata.sealed_sender && sender.profile_shared {
            // The sender should have our profile key but sent over an
            // unsealed channel; push the key so future sends seal
            self.push_profile_key(sender, message)?;
        }

        Ok(())
    }

    fn push_profile_key(&self, sender: &Recipient, message: &DataMessage) -> Result<(), Error> {
        match message.group.as_ref() {
            Some(context) if context.version == GroupVersion::V2 => {
                tracing::info!(
                    target: "courier_core::processor",
                    "Peer {} is missing our profile key. Refreshing group attributes and pushing into {}.",
                    sender.id,
                    context.id
                );
                self.jobs().add_chain(crate::jobs::JobChain::of(vec![
                    Job::RefreshGroup {
                        group_id: context.id.clone(),
                    },
                    Job::PushProfileKey {
                        recipient: None,
                        group_id: Some(context.id.clone()),
                    },
                ]));
            }
            _ => {
                tracing::info!(
                    target: "courier_core::processor",
                    "Peer {} is missing our profile key. Pushing directly.",
                    sender.id
                );
                self.jobs().add(Job::PushProfileKey {
                    recipient: Some(sender.id),
                    group_id: None,
                });
            }
        }
        Ok(())
    }

    /// Delivery/read acknowledgments: bump counters keyed by the original
    /// send timestamp and prune matching resend log entries. No dispatch.
    fn handle_receipt(
        &self,
        sender: &Recipient,
        receipt: &ReceiptMessage,
    ) -> Result<(), Error> {
        for &timestamp in &receipt.timestamps {
            let matched = match receipt.kind {
                ReceiptKind::Delivery => self.storage().mark_delivered(timestamp, sender.id)?,
                ReceiptKind::Read => self.storage().mark_read(timestamp, sender.id)?,
            };

            tracing::debug!(
                target: "courier_core::processor",
                "{:?} receipt from {} for {} (matched: {})",
                receipt.kind,
                sender.id,
                timestamp,
                matched.is_some()
            );

            self.storage().prune_log_for_receipt(sender.id, timestamp)?;
        }
        Ok(())
    }

    /// The ignore-filter, evaluated before any side effect.
    fn check_ignore(
        &self,
        content: &Content,
        sender: &Recipient,
    ) -> Result<ContentFilter, Error> {
        match content {
            Content::Data(message) => self.check_ignore_data(message, sender),
            Content::Call(_) => {
                if sender.blocked {
                    Ok(ContentFilter::Ignore("call message from blocked sender"))
                } else {
                    Ok(ContentFilter::Process)
                }
            }
            Content::Typing(message) => self.check_ignore_typing(message, sender),
            Content::Story(message) => {
                if let Some(context) = &message.group {
                    if let Some(group) = self.storage().find_group(&context.id)? {
                        if self.is_recipient_blocked(group.recipient)? {
                            return Ok(ContentFilter::Ignore("story for blocked group"));
                        }
                    }
                }
                if sender.blocked {
                    Ok(ContentFilter::Ignore("story from blocked sender"))
                } else {
                    Ok(ContentFilter::Process)
                }
            }
            _ => Ok(ContentFilter::Process),
        }
    }

    fn check_ignore_data(
        &self,
        message: &DataMessage,
        sender: &Recipient,
    ) -> Result<ContentFilter, Error> {
        let context = match &message.group {
            Some(context) => context,
            None => {
                return if sender.blocked {
                    Ok(ContentFilter::Ignore("message from blocked sender"))
                } else {
                    Ok(ContentFilter::Process)
                };
            }
        };

        let group = match self.storage().find_group(&context.id)? {
            Some(group) => group,
            None => {
                return if sender.blocked {
                    Ok(ContentFilter::Ignore("unknown group, blocked sender"))
                } else {
                    Ok(ContentFilter::RecoverGroup(context.clone()))
                };
            }
        };

        if self.is_recipient_blocked(group.recipient)? {
            return Ok(ContentFilter::Ignore("message for blocked group"));
        }

        let is_gv2_update = message.is_group_v2_update();

        if !group.active && message.is_content_message() && !is_gv2_update {
            return Ok(ContentFilter::Ignore("content message for inactive group"));
        }

        if sender.blocked && !message.is_legacy_group_leave() && !is_gv2_update {
            return Ok(ContentFilter::Ignore("message from blocked sender"));
        }

        if context.version == GroupVersion::V2 && !group.members.contains(&sender.id) {
            return Ok(ContentFilter::Ignore("message from non-member"));
        }

        if group.announcement_only
            && !group.is_admin(sender.id)
            && message.is_content_message()
        {
            return Ok(ContentFilter::Ignore(
                "content from non-admin in announcement-only group",
            ));
        }

        Ok(ContentFilter::Process)
    }

    fn check_ignore_typing(
        &self,
        message: &TypingMessage,
        sender: &Recipient,
    ) -> Result<ContentFilter, Error> {
        if sender.blocked {
            return Ok(ContentFilter::Ignore("typing from blocked sender"));
        }

        if let Some(group_id) = &message.group_id {
            let group = match self.storage().find_group(group_id)? {
                Some(group) => group,
                None => return Ok(ContentFilter::Ignore("typing for unknown group")),
            };

            if self.is_recipient_blocked(group.recipient)? || !group.active {
                return Ok(ContentFilter::Ignore("typing for blocked/inactive group"));
            }

            if group.announcement_only && !group.is_admin(sender.id) {
                return Ok(ContentFilter::Ignore(
                    "typing from non-admin in announcement-only group",
                ));
            }
        }

        Ok(ContentFilter::Process)
    }

    fn is_recipient_blocked(&self, id: RecipientId) -> Result<bool, Error> {
        Ok(self
            .storage()
            .find_recipient(id)?
            .map(|r| r.blocked)
            .unwrap_or(false))
    }

    /// Group-metadata recovery for a group we have no local record of:
    /// ask a member for info (legacy) or reconstruct a skeleton from the
    /// embedded master key and refresh from the server (new-style).
    fn recover_group(&self, context: &GroupContext, sender: &Recipient) -> Result<(), Error> {
        match context.version {
            GroupVersion::Legacy => {
                self.jobs().add(Job::RequestGroupInfo {
                    group_id: context.id.clone(),
                    sender: sender.id,
                });
            }
            GroupVersion::V2 => {
                let master_key = match &context.master_key {
                    Some(master_key) => master_key.clone(),
                    None => {
                        return Err(Error::BadGroupId(context.id.to_string()));
                    }
                };

                let group_recipient = self.group_recipient_for(&context.id)?;
                self.storage().save_group(Group {
                    id: context.id.clone(),
                    version: GroupVersion::V2,
                    master_key: Some(master_key),
                    revision: context.revision,
                    active: false,
                    announcement_only: false,
                    members: vec![],
                    admins: vec![],
                    distribution_id: None,
                    recipient: group_recipient,
                })?;

                self.jobs().add(Job::RefreshGroup {
                    group_id: context.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// The recipient row representing a group conversation, created on
    /// first contact. Group recipients are keyed by a service id derived
    /// from the group id so resolution stays high-trust.
    fn group_recipient_for(
        &self,
        group_id: &courier_storage_traits::GroupId,
    ) -> Result<RecipientId, Error> {
        let mut bytes = [0u8; 16];
        for (i, b) in group_id.as_slice().iter().enumerate() {
            bytes[i % 16] ^= b;
        }
        let synthetic = courier_storage_traits::ServiceId::from_bytes(bytes);
        Ok(self.storage().resolve_service_id(&synthetic)?.id)
    }

    /// When an incoming message matches a pending retry we requested, the
    /// insert uses the original receive time unless the conversation has
    /// been viewed since.
    fn receive_time_for(
        &self,
        pending: Option<&PendingRetryReceipt>,
        content: &Content,
        sender: &Recipient,
        client_timestamp_ms: u64,
    ) -> Result<u64, Error> {
        let mut received = now_ms();

        let pending = match pending {
            Some(pending) => pending,
            None => return Ok(received),
        };

        tracing::warn!(
            target: "courier_core::processor",
            "[{}] Incoming message matches a pending retry we were expecting.",
            client_timestamp_ms
        );

        let destination = match content {
            Content::Data(message) => match &message.group {
                Some(context) => self
                    .storage()
                    .find_group(&context.id)?
                    .map(|g| g.recipient)
                    .unwrap_or(sender.id),
                None => sender.id,
            },
            _ => sender.id,
        };

        match self.storage().thread_for_recipient(destination)? {
            Some(thread) => {
                let last_seen = self.storage().last_seen(thread)?.unwrap_or(0);
                if last_seen > 0 && last_seen < pending.received_timestamp_ms {
                    received = pending.received_timestamp_ms;
                    tracing::warn!(
                        target: "courier_core::processor",
                        "[{}] Thread has not been opened yet. Using received timestamp of {}",
                        client_timestamp_ms,
                        received
                    );
                } else {
                    tracing::warn!(
                        target: "courier_core::processor",
                        "[{}] Thread was opened after receiving the original message. Using the current time.",
                        client_timestamp_ms
                    );
                }
            }
            None => {
                tracing::warn!(
                    target: "courier_core::processor",
                    "[{}] Could not find a thread for the pending message. Using current time.",
                    client_timestamp_ms
                );
            }
        }

        Ok(received)
    }

    fn handle_typing(
        &self,
        sender: &Recipient,
        metadata: &EnvelopeMetadata,
        message: &TypingMessage,
        client_timestamp_ms: u64,
    ) -> Result<(), Error> {
        if !self.config.typing_indicators_enabled {
            return Ok(());
        }

        let thread = match &message.group_id {
            Some(group_id) => {
                if !self.storage().is_current_member(group_id, sender.id)? {
                    tracing::warn!(
                        target: "courier_core::processor",
                        "[{}] Seen typing indicator for non-member {}",
                        client_timestamp_ms,
                        sender.id
                    );
                    return Ok(());
                }

                let group = self
                    .storage()
                    .find_group(group_id)?
                    .ok_or_else(|| Error::BadGroupId(group_id.to_string()))?;
                self.storage().get_or_create_thread(group.recipient)?
            }
            None => self.storage().get_or_create_thread(sender.id)?,
        };

        match message.action {
            TypingAction::Started => {
                tracing::debug!(
                    target: "courier_core::processor",
                    "Typing started on thread {} by {}.{}",
                    thread,
                    sender.id,
                    metadata.source_device
                );
            }
            TypingAction::Stopped => {
                tracing::debug!(
                    target: "courier_core::processor",
                    "Typing stopped on thread {} by {}.{}",
                    thread,
                    sender.id,
                    metadata.source_device
                );
            }
        }

        Ok(())
    }

    pub(crate) fn handle_story(
        &self,
        sender: &Recipient,
        metadata: &EnvelopeMetadata,
        message: &StoryMessage,
        client_timestamp_ms: u64,
        received_timestamp_ms: u64,
    ) -> Result<(), Error> {
        use courier_storage_traits::messages::types::{MessageKind, NewMessage};

        let thread_recipient = match &message.group {
            Some(context) => match self.storage().find_group(&context.id)? {
                Some(group) => group.recipient,
                None => {
                    self.recover_group(context, sender)?;
                    return Ok(());
                }
            },
            None => sender.id,
        };

        let thread = self.storage().get_or_create_thread(thread_recipient)?;

        self.storage().insert_message(NewMessage {
            thread,
            sender: sender.id,
            sender_device: metadata.source_device,
            sent_timestamp_ms: message.sent_timestamp_ms,
            server_timestamp_ms: client_timestamp_ms,
            received_timestamp_ms,
            kind: MessageKind::Story,
            body: message.body.clone(),
            attachment_count: 0,
            expires_in_ms: None,
            outgoing: false,
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use courier_storage_traits::messages::MessageStorage;
    use courier_storage_traits::recipients::RecipientStorage;
    use courier_storage_traits::resend_log::MessageLogStorage;
    use courier_storage_traits::resend_log::types::{ContentHint, NewLogEntry};
    use courier_storage_traits::retry_receipts::RetryReceiptStorage;
    use courier_storage_traits::threads::ThreadStorage;
    use courier_storage_traits::{DeviceId, ServiceId};

    use super::*;
    use crate::cipher::CipherError;
    use crate::content::{DataPayload, ReactionPayload};
    use crate::test_util::*;
    use crate::CourierConfig;

    fn group_text(body: &str, sent_ms: u64, context: GroupContext) -> Content {
        Content::Data(DataMessage {
            sent_timestamp_ms: sent_ms,
            group: Some(context),
            profile_key: None,
            expires_in_ms: None,
            payload: DataPayload::Text {
                body: body.to_string(),
            },
        })
    }

    fn context_for(group: &courier_storage_traits::groups::types::Group) -> GroupContext {
        GroupContext {
            id: group.id.clone(),
            version: group.version,
            master_key: group.master_key.clone(),
            revision: group.revision,
            has_signed_change: false,
        }
    }

    /// Blocked sender, group message, plain text body: zero DB mutations
    /// and no error.
    #[test]
    fn test_ignore_filter_blocked_sender_group_message() {
        let harness = create_test_courier(CourierConfig::default());
        let peer = ServiceId::from_bytes([2u8; 16]);

        let mut sender = harness.storage().resolve_service_id(&peer).unwrap();
        sender.blocked = true;
        harness.storage().save_recipient(sender.clone()).unwrap();

        let group = create_test_group(harness.storage(), &[1, 2, 3], &[sender.id], &[]);

        harness
            .courier
            .handle_content(
                group_text("hello", 1000, context_for(&group)),
                success_metadata(peer),
                1000,
                1001,
                false,
            )
            .unwrap();

        let thread = harness
            .storage()
            .thread_for_recipient(group.recipient)
            .unwrap();
        assert!(thread.is_none(), "no thread row may be created");
        assert!(harness.jobs.jobs().is_empty(), "no jobs may be enqueued");
    }

    /// A legacy-group-leave from a blocked sender is still processed.
    #[test]
    fn test_ignore_filter_blocked_sender_leave_allowed() {
        let harness = create_test_courier(CourierConfig::default());
        let peer = ServiceId::from_bytes([2u8; 16]);

        let mut sender = harness.storage().resolve_service_id(&peer).unwrap();
        sender.blocked = true;
        harness.storage().save_recipient(sender.clone()).unwrap();

        let mut group = create_test_group(harness.storage(), &[1, 2, 3], &[sender.id], &[]);
        group.version = courier_storage_traits::groups::types::GroupVersion::Legacy;
        {
            use courier_storage_traits::groups::GroupStorage;
            harness.storage().save_group(group.clone()).unwrap();
        }

        let mut context = context_for(&group);
        context.version = courier_storage_traits::groups::types::GroupVersion::Legacy;

        harness
            .courier
            .handle_content(
                Content::Data(DataMessage {
                    sent_timestamp_ms: 1000,
                    group: Some(context),
                    profile_key: None,
                    expires_in_ms: None,
                    payload: DataPayload::LegacyGroupUpdate { leaving: true },
                }),
                success_metadata(peer),
                1000,
                1001,
                false,
            )
            .unwrap();

        let thread = harness
            .storage()
            .thread_for_recipient(group.recipient)
            .unwrap()
            .expect("leave notice must be recorded");
        assert_eq!(
            harness.storage().messages_in_thread(thread).unwrap().len(),
            1
        );
    }

    /// Inactive group: ordinary content is dropped, control messages are
    /// not.
    #[test]
    fn test_ignore_filter_inactive_group() {
        let harness = create_test_courier(CourierConfig::default());
        let peer = ServiceId::from_bytes([2u8; 16]);
        let sender = harness.storage().resolve_service_id(&peer).unwrap();

        let mut group = create_test_group(harness.storage(), &[1, 2, 3], &[sender.id], &[]);
        group.active = false;
        {
            use courier_storage_traits::groups::GroupStorage;
            harness.storage().save_group(group.clone()).unwrap();
        }

        harness
            .courier
            .handle_content(
                group_text("hello", 1000, context_for(&group)),
                success_metadata(peer),
                1000,
                1001,
                false,
            )
            .unwrap();

        assert!(harness
            .storage()
            .thread_for_recipient(group.recipient)
            .unwrap()
            .is_none());

        harness
            .courier
            .handle_content(
                Content::Data(DataMessage {
                    sent_timestamp_ms: 2000,
                    group: Some(context_for(&group)),
                    profile_key: None,
                    expires_in_ms: None,
                    payload: DataPayload::ExpirationUpdate,
                }),
                success_metadata(peer),
                2000,
                2001,
                false,
            )
            .unwrap();

        let thread = harness
            .storage()
            .thread_for_recipient(group.recipient)
            .unwrap()
            .expect("control message must land");
        assert_eq!(
            harness.storage().messages_in_thread(thread).unwrap().len(),
            1
        );
    }

    /// Unknown group: the message is skipped but recovery kicks in.
    #[test]
    fn test_unknown_group_triggers_recovery() {
        let harness = create_test_courier(CourierConfig::default());
        let peer = ServiceId::from_bytes([2u8; 16]);

        let context = GroupContext {
            id: courier_storage_traits::GroupId::from_slice(&[9, 9, 9]),
            version: courier_storage_traits::groups::types::GroupVersion::V2,
            master_key: Some(courier_storage_traits::Secret::new([7u8; 32])),
            revision: 4,
            has_signed_change: false,
        };

        harness
            .courier
            .handle_content(
                group_text("hello", 1000, context.clone()),
                success_metadata(peer),
                1000,
                1001,
                false,
            )
            .unwrap();

        // Skeleton group reconstructed from the embedded master key
        let group = {
            use courier_storage_traits::groups::GroupStorage;
            harness
                .storage()
                .find_group(&context.id)
                .unwrap()
                .expect("skeleton group should be saved")
        };
        assert!(!group.active);
        assert_eq!(group.revision, 4);

        assert!(harness
            .jobs
            .jobs()
            .iter()
            .any(|j| matches!(j, Job::RefreshGroup { .. })));
    }

    /// P2: the same envelope bytes twice yield one stored message and a
    /// duplicate classification on the second attempt.
    #[test]
    fn test_duplicate_envelope_idempotence() {
        let harness = create_test_courier(CourierConfig::default());
        let peer = ServiceId::from_bytes([2u8; 16]);

        let envelope = test_envelope(1000);
        harness.cipher.script_success(
            &envelope,
            text_content_at("once", 1000),
            success_metadata(peer),
        );

        harness.courier.process_envelope(&envelope, 0).unwrap();

        // The ratchet has advanced; the same bytes now classify as a
        // duplicate
        harness.cipher.script_error(
            &envelope,
            CipherError::Duplicate(crate::cipher::CipherErrorContext {
                sender: Some(peer),
                sender_device: DeviceId::PRIMARY,
                ..Default::default()
            }),
        );
        harness.courier.process_envelope(&envelope, 0).unwrap();

        let sender = harness.storage().resolve_service_id(&peer).unwrap();
        let thread = harness
            .storage()
            .thread_for_recipient(sender.id)
            .unwrap()
            .expect("thread should exist");
        assert_eq!(
            harness.storage().messages_in_thread(thread).unwrap().len(),
            1,
            "exactly one stored message"
        );
    }

    /// P6: a reaction arriving before its target parks in the early cache
    /// and is applied exactly once when the target lands.
    #[test]
    fn test_early_cache_reaction_replay() {
        let harness = create_test_courier(CourierConfig::default());
        let author = ServiceId::from_bytes([2u8; 16]);
        let reactor = ServiceId::from_bytes([3u8; 16]);

        let reaction = Content::Data(DataMessage {
            sent_timestamp_ms: 2000,
            group: None,
            profile_key: None,
            expires_in_ms: None,
            payload: DataPayload::Reaction(ReactionPayload {
                emoji: "+1".to_string(),
                remove: false,
                target_author: author,
                target_sent_timestamp_ms: 1000,
            }),
        });

        harness
            .courier
            .handle_content(reaction, success_metadata(reactor), 2000, 2001, false)
            .unwrap();

        // Nothing applied yet
        let author_recipient = harness.storage().resolve_service_id(&author).unwrap();
        assert!(harness
            .storage()
            .find_message_by_sent_timestamp(author_recipient.id, 1000)
            .unwrap()
            .is_none());

        // The target arrives; the parked reaction replays
        harness
            .courier
            .handle_content(
                text_content_at("the target", 1000),
                success_metadata(author),
                1000,
                1001,
                false,
            )
            .unwrap();

        let target = harness
            .storage()
            .find_message_by_sent_timestamp(author_recipient.id, 1000)
            .unwrap()
            .expect("target stored");
        let reactions = harness.storage().reactions_for(target.id).unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "+1");

        // Re-processing the target must not replay again
        harness
            .courier
            .handle_content(
                text_content_at("the target", 1000),
                success_metadata(author),
                1000,
                1001,
                false,
            )
            .unwrap();
        assert_eq!(
            harness.storage().reactions_for(target.id).unwrap().len(),
            1,
            "replay happens at most once"
        );
    }

    /// Receipts bump counters and prune the resend log, and nothing else.
    #[test]
    fn test_receipt_prunes_resend_log() {
        let harness = create_test_courier(CourierConfig::default());
        let peer = ServiceId::from_bytes([2u8; 16]);
        let sender = harness.storage().resolve_service_id(&peer).unwrap();

        // An outgoing message and its log entry
        let thread = harness.storage().get_or_create_thread(sender.id).unwrap();
        let me = harness.storage().self_recipient().unwrap();
        let message_id = harness
            .storage()
            .insert_message(courier_storage_traits::messages::types::NewMessage {
                thread,
                sender: me.id,
                sender_device: DeviceId::PRIMARY,
                sent_timestamp_ms: 5000,
                server_timestamp_ms: 5000,
                received_timestamp_ms: 5000,
                kind: courier_storage_traits::messages::types::MessageKind::Text,
                body: Some("out".to_string()),
                attachment_count: 0,
                expires_in_ms: None,
                outgoing: true,
            })
            .unwrap();

        harness
            .storage()
            .insert_log_entry(NewLogEntry {
                recipients: vec![(sender.id, DeviceId::PRIMARY)],
                sent_timestamp_ms: 5000,
                content: vec![1, 2, 3],
                content_hint: ContentHint::Resendable,
                urgent: false,
                related_message_id: Some(message_id),
            })
            .unwrap();

        harness
            .courier
            .handle_content(
                Content::Receipt(ReceiptMessage {
                    kind: ReceiptKind::Delivery,
                    timestamps: vec![5000],
                }),
                success_metadata(peer),
                6000,
                6001,
                false,
            )
            .unwrap();

        let record = harness
            .storage()
            .find_message(message_id)
            .unwrap()
            .unwrap();
        assert_eq!(record.delivery_receipt_count, 1);

        assert!(
            harness
                .storage()
                .find_log_entry(sender.id, DeviceId::PRIMARY, 5000)
                .unwrap()
                .is_none(),
            "log entry must be pruned on delivery receipt"
        );
    }

    /// A processed message consumes its pending retry row.
    #[test]
    fn test_pending_retry_consumed() {
        let harness = create_test_courier(CourierConfig::default());
        let peer = ServiceId::from_bytes([2u8; 16]);
        let sender = harness.storage().resolve_service_id(&peer).unwrap();
        let thread = harness.storage().get_or_create_thread(sender.id).unwrap();

        harness
            .storage()
            .insert_pending_retry(PendingRetryReceipt {
                author: sender.id,
                device: DeviceId::PRIMARY,
                sent_timestamp_ms: 1000,
                received_timestamp_ms: 900,
                thread,
            })
            .unwrap();

        harness
            .courier
            .handle_content(
                text_content_at("resent", 1000),
                success_metadata(peer),
                1000,
                1001,
                false,
            )
            .unwrap();

        assert!(
            harness
                .storage()
                .find_pending_retry(sender.id, 1000)
                .unwrap()
                .is_none(),
            "pending retry must be deleted after processing"
        );
    }

    /// Call messages pinned to another device are dropped.
    #[test]
    fn test_call_message_device_targeting() {
        let harness = create_test_courier(CourierConfig::default());
        let peer = ServiceId::from_bytes([2u8; 16]);

        harness
            .courier
            .handle_content(
                Content::Call(crate::content::CallMessage {
                    destination_device_id: Some(DeviceId::new(4)),
                    payload: vec![1],
                }),
                success_metadata(peer),
                1000,
                1001,
                false,
            )
            .unwrap();
        assert!(harness.jobs.jobs().is_empty());

        harness
            .courier
            .handle_content(
                Content::Call(crate::content::CallMessage {
                    destination_device_id: Some(DeviceId::PRIMARY),
                    payload: vec![1],
                }),
                success_metadata(peer),
                1000,
                1001,
                false,
            )
            .unwrap();
        assert!(matches!(
            harness.jobs.jobs()[..],
            [Job::DispatchCallMessage { .. }]
        ));
    }

    /// A fresh profile key on a data message is persisted and triggers a
    /// profile refresh.
    #[test]
    fn test_profile_key_mismatch_refreshes() {
        let harness = create_test_courier(CourierConfig::default());
        let peer = ServiceId::from_bytes([2u8; 16]);

        harness
            .courier
            .handle_content(
                Content::Data(DataMessage {
                    sent_timestamp_ms: 1000,
                    group: None,
                    profile_key: Some(courier_storage_traits::Secret::new([9u8; 32])),
                    expires_in_ms: None,
                    payload: DataPayload::Text {
                        body: "hi".to_string(),
                    },
                }),
                success_metadata(peer),
                1000,
                1001,
                false,
            )
            .unwrap();

        let sender = harness.storage().resolve_service_id(&peer).unwrap();
        assert_eq!(
            sender.profile_key,
            Some(courier_storage_traits::Secret::new([9u8; 32]))
        );
        assert!(harness
            .jobs
            .jobs()
            .iter()
            .any(|j| matches!(j, Job::RefreshProfile { .. })));
    }

    /// Inserted data messages demand a delivery receipt.
    #[test]
    fn test_delivery_receipt_job_enqueued() {
        let harness = create_test_courier(CourierConfig::default());
        let peer = ServiceId::from_bytes([2u8; 16]);

        harness
            .courier
            .handle_content(
                text_content_at("hi", 1000),
                success_metadata(peer),
                1000,
                1001,
                false,
            )
            .unwrap();

        assert!(harness.jobs.jobs().iter().any(|j| matches!(
            j,
            Job::SendDeliveryReceipt {
                sent_timestamp_ms: 1000,
                ..
            }
        )));
    }
}
