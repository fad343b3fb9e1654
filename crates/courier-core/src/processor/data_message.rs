//! Chat (data) message handling.
//!
//! Converts a decrypted data message into durable rows: text/media
//! inserts, reactions, remote-deletes, control messages. Reactions and
//! remote-deletes whose target is not yet known are parked in the early
//! message cache.

use courier_storage_traits::messages::types::{MessageKind, NewMessage, Reaction};
use courier_storage_traits::recipients::types::Recipient;
use courier_storage_traits::{CourierStorageProvider, MessageId, ThreadId};

use crate::content::{DataMessage, DataPayload, EnvelopeMetadata, ReactionPayload};
use crate::error::Error;
use crate::jobs::Job;
use crate::processor::early_cache::EarlyEntry;
use crate::Courier;

impl<Storage> Courier<Storage>
where
    Storage: CourierStorageProvider,
{
    /// Handle one data message. Returns the inserted message id, or `None`
    /// when the message mutated existing rows (reactions, deletes) or was
    /// parked in the early cache.
    pub(crate) fn process_data_message(
        &self,
        sender: &Recipient,
        metadata: &EnvelopeMetadata,
        message: &DataMessage,
        client_timestamp_ms: u64,
        received_timestamp_ms: u64,
        early_entry: Option<EarlyEntry>,
    ) -> Result<Option<MessageId>, Error> {
        let thread = self.thread_for_data_message(sender, message)?;

        let inserted = match &message.payload {
            DataPayload::Text { body } => Some(self.insert_data_row(
                sender,
                metadata,
                message,
                thread,
                client_timestamp_ms,
                received_timestamp_ms,
                MessageKind::Text,
                Some(body.clone()),
                0,
            )?),
            DataPayload::Media {
                body,
                attachment_count,
            } => Some(self.insert_data_row(
                sender,
                metadata,
                message,
                thread,
                client_timestamp_ms,
                received_timestamp_ms,
                MessageKind::Media,
                body.clone(),
                *attachment_count,
            )?),
            DataPayload::Reaction(reaction) => {
                self.handle_reaction(sender, reaction, client_timestamp_ms, early_entry)?;
                None
            }
            DataPayload::RemoteDelete {
                target_sent_timestamp_ms,
            } => {
                self.handle_remote_delete(
                    sender,
                    *target_sent_timestamp_ms,
                    client_timestamp_ms,
                    early_entry,
                )?;
                None
            }
            DataPayload::Payment { note } => Some(self.insert_data_row(
                sender,
                metadata,
                message,
                thread,
                client_timestamp_ms,
                received_timestamp_ms,
                MessageKind::Payment,
                note.clone(),
                0,
            )?),
            DataPayload::ExpirationUpdate => Some(self.insert_data_row(
                sender,
                metadata,
                message,
                thread,
                client_timestamp_ms,
                received_timestamp_ms,
                MessageKind::ExpirationUpdate,
                None,
                0,
            )?),
            DataPayload::EndSession => {
                let id = self.insert_data_row(
                    sender,
                    metadata,
                    message,
                    thread,
                    client_timestamp_ms,
                    received_timestamp_ms,
                    MessageKind::EndSession,
                    None,
                    0,
                )?;

                tracing::info!(
                    target: "courier_core::processor",
                    "[{}] End-session message from {}. Deleting all sessions.",
                    client_timestamp_ms,
                    sender.id
                );
                self.storage()
                    .delete_all_sessions(&sender.require_service_id()?)?;

                Some(id)
            }
            DataPayload::LegacyGroupUpdate { leaving } => {
                tracing::info!(
                    target: "courier_core::processor",
                    "[{}] Legacy group update from {} (leaving: {})",
                    client_timestamp_ms,
                    sender.id,
                    leaving
                );
                Some(self.insert_data_row(
                    sender,
                    metadata,
                    message,
                    thread,
                    client_timestamp_ms,
                    received_timestamp_ms,
                    MessageKind::GroupUpdate,
                    None,
                    0,
                )?)
            }
            DataPayload::GroupCallUpdate { era_id } => Some(self.insert_data_row(
                sender,
                metadata,
                message,
                thread,
                client_timestamp_ms,
                received_timestamp_ms,
                MessageKind::GroupCallUpdate,
                era_id.clone(),
                0,
            )?),
            DataPayload::StoryReply {
                story_sent_timestamp_ms,
                story_author,
                body,
            } => self.handle_story_reply(
                sender,
                metadata,
                message,
                thread,
                *story_sent_timestamp_ms,
                *story_author,
                body,
                client_timestamp_ms,
                received_timestamp_ms,
                early_entry,
            )?,
        };

        // A fresh profile key on any data message is persisted immediately
        if let Some(profile_key) = &message.profile_key {
            self.handle_profile_key(sender, profile_key.clone(), client_timestamp_ms)?;
        }

        Ok(inserted)
    }

    /// Resolve (and update) the thread a data message lands in. Group
    /// revision advances observed on the wire are applied to the stored
    /// group row.
    fn thread_for_data_message(
        &self,
        sender: &Recipient,
        message: &DataMessage,
    ) -> Result<ThreadId, Error> {
        match &message.group {
            Some(context) => {
                let mut group = self
                    .storage()
                    .find_group(&context.id)?
                    .ok_or_else(|| Error::BadGroupId(context.id.to_string()))?;

                if context.revision > group.revision {
                    tracing::info!(
                        target: "courier_core::processor",
                        "Group {} advanced to revision {} on the wire (stored: {}). Updating.",
                        context.id,
                        context.revision,
                        group.revision
                    );
                    group.revision = context.revision;
                    self.storage().save_group(group.clone())?;

                    if context.has_signed_change {
                        self.jobs().add(Job::RefreshGroup {
                            group_id: context.id.clone(),
                        });
                    }
                }

                Ok(self.storage().get_or_create_thread(group.recipient)?)
            }
            None => Ok(self.storage().get_or_create_thread(sender.id)?),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_data_row(
        &self,
        sender: &Recipient,
        metadata: &EnvelopeMetadata,
        message: &DataMessage,
        thread: ThreadId,
        client_timestamp_ms: u64,
        received_timestamp_ms: u64,
        kind: MessageKind,
        body: Option<String>,
        attachment_count: u32,
    ) -> Result<MessageId, Error> {
        Ok(self.storage().insert_message(NewMessage {
            thread,
            sender: sender.id,
            sender_device: metadata.source_device,
            sent_timestamp_ms: message.sent_timestamp_ms,
            server_timestamp_ms: client_timestamp_ms,
            received_timestamp_ms,
            kind,
            body,
            attachment_count,
            expires_in_ms: message.expires_in_ms,
            outgoing: false,
        })?)
    }

    fn handle_reaction(
        &self,
        sender: &Recipient,
        reaction: &ReactionPayload,
        client_timestamp_ms: u64,
        early_entry: Option<EarlyEntry>,
    ) -> Result<(), Error> {
        let target_author = self
            .storage()
            .resolve_service_id(&reaction.target_author)?;

        let target = self
            .storage()
            .find_message_by_sent_timestamp(target_author.id, reaction.target_sent_timestamp_ms)?;

        let target = match target {
            Some(target) => target,
            None => {
                tracing::warn!(
                    target: "courier_core::processor",
                    "[{}] Could not find matching message! Putting it in the early message cache. timestamp: {} author: {}",
                    client_timestamp_ms,
                    reaction.target_sent_timestamp_ms,
                    target_author.id
                );
                if let Some(entry) = early_entry {
                    self.early_cache().store(
                        target_author.id,
                        reaction.target_sent_timestamp_ms,
                        entry,
                    );
                }
                return Ok(());
            }
        };

        if target.remotely_deleted {
            tracing::warn!(
                target: "courier_core::processor",
                "[{}] Found a matching message, but it's flagged as remotely deleted. timestamp: {} author: {}",
                client_timestamp_ms,
                reaction.target_sent_timestamp_ms,
                target_author.id
            );
            return Ok(());
        }

        self.storage().apply_reaction(Reaction {
            message: target.id,
            author: sender.id,
            emoji: reaction.emoji.clone(),
            sent_timestamp_ms: client_timestamp_ms,
            remove: reaction.remove,
        })?;

        Ok(())
    }

    fn handle_remote_delete(
        &self,
        sender: &Recipient,
        target_sent_timestamp_ms: u64,
        client_timestamp_ms: u64,
        early_entry: Option<EarlyEntry>,
    ) -> Result<(), Error> {
        let target = self
            .storage()
            .find_message_by_sent_timestamp(sender.id, target_sent_timestamp_ms)?;

        let target = match target {
            Some(target) => target,
            None => {
                tracing::warn!(
                    target: "courier_core::processor",
                    "[{}] Could not find matching message! timestamp: {} author: {}",
                    client_timestamp_ms,
                    target_sent_timestamp_ms,
                    sender.id
                );
                if let Some(entry) = early_entry {
                    self.early_cache()
                        .store(sender.id, target_sent_timestamp_ms, entry);
                }
                return Ok(());
            }
        };

        // Only the original author may delete; the lookup above is keyed
        // by sender, so a mismatch means the row changed owners
        if target.sender != sender.id {
            tracing::warn!(
                target: "courier_core::processor",
                "[{}] Invalid remote delete! deleteAuthor: {}, targetAuthor: {}",
                client_timestamp_ms,
                sender.id,
                target.sender
            );
            return Ok(());
        }

        self.storage().mark_remotely_deleted(target.id)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_story_reply(
        &self,
        sender: &Recipient,
        metadata: &EnvelopeMetadata,
        message: &DataMessage,
        thread: ThreadId,
        story_sent_timestamp_ms: u64,
        story_author: courier_storage_traits::ServiceId,
        body: &str,
        client_timestamp_ms: u64,
        received_timestamp_ms: u64,
        early_entry: Option<EarlyEntry>,
    ) -> Result<Option<MessageId>, Error> {
        let author = self.storage().resolve_service_id(&story_author)?;

        let story = self
            .storage()
            .find_message_by_sent_timestamp(author.id, story_sent_timestamp_ms)?;

        if story.is_none() {
            tracing::warn!(
                target: "courier_core::processor",
                "[{}] Could not find story for reply! timestamp: {} author: {}",
                client_timestamp_ms,
                story_sent_timestamp_ms,
                author.id
            );
            if let Some(entry) = early_entry {
                self.early_cache()
                    .store(author.id, story_sent_timestamp_ms, entry);
            }
            return Ok(None);
        }

        let id = self.insert_data_row(
            sender,
            metadata,
            message,
            thread,
            client_timestamp_ms,
            received_timestamp_ms,
            MessageKind::StoryReply,
            Some(body.to_string()),
            0,
        )?;

        Ok(Some(id))
    }

    /// Compare a fresh profile key against the stored one; persist and
    /// refresh on change.
    fn handle_profile_key(
        &self,
        sender: &Recipient,
        profile_key: courier_storage_traits::Secret<[u8; 32]>,
        client_timestamp_ms: u64,
    ) -> Result<(), Error> {
        let changed = self.storage().set_profile_key(sender.id, profile_key)?;

        if changed {
            tracing::info!(
                target: "courier_core::processor",
                "[{}] Profile key on message from {} didn't match our local store. Persisting and refreshing.",
                client_timestamp_ms,
                sender.id
            );
            self.jobs().add(Job::RefreshProfile {
                recipient: sender.id,
            });
        }

        Ok(())
    }
}
