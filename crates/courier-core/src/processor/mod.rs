//! The serialized content processor.
//!
//! Exactly one invocation runs at a time process-wide. The critical
//! section is a single reentrant lock acquired before any invocation and
//! released on every exit path, including errors: receipt counters and
//! "is this group known yet" checks depend on observing a single
//! consistent ordering of all incoming content, regardless of which
//! retrieval strategy produced it. Reentrancy lets early-cache replay
//! re-enter without deadlocking.

pub(crate) mod content;
pub(crate) mod data_message;
pub(crate) mod early_cache;
pub(crate) mod retry_receipt;

use courier_storage_traits::messages::types::{MessageKind, NewMessage, PlaceholderKind};
use courier_storage_traits::recipients::types::Recipient;
use courier_storage_traits::{CourierStorageProvider, DeviceId, GroupId};

use crate::content::ErrorMetadata;
use crate::decrypt::{DecryptionResult, MessageState};
use crate::envelope::Envelope;
use crate::error::Error;
use crate::util::now_ms;
use crate::Courier;

impl<Storage> Courier<Storage>
where
    Storage: CourierStorageProvider,
{
    /// Convert a decryption result into durable side effects.
    ///
    /// Blocks until the global processor lock is free; the lock is held
    /// for the full invocation and released on every exit path.
    pub fn process(
        &self,
        result: DecryptionResult,
        server_delivered_timestamp_ms: u64,
    ) -> Result<(), Error> {
        let _guard = self.process_lock().lock();

        match result {
            DecryptionResult::Success {
                content,
                metadata,
                client_timestamp_ms,
                ..
            } => self.handle_content(
                content,
                metadata,
                client_timestamp_ms,
                server_delivered_timestamp_ms,
                false,
            ),
            DecryptionResult::Error {
                state,
                metadata,
                client_timestamp_ms,
                ..
            } => self.handle_exception(state, metadata, client_timestamp_ms),
            DecryptionResult::Noop { .. } => {
                tracing::debug!(
                    target: "courier_core::processor",
                    "Nothing to process."
                );
                Ok(())
            }
        }
    }

    /// Decrypt one envelope, process the result, and enqueue its follow-up
    /// jobs. Returns the names of the job queues touched.
    ///
    /// The lock is acquired here, before decryption, so that envelopes
    /// read sequentially from one connection advance ratchet state and
    /// reach storage in read order.
    pub fn process_envelope(
        &self,
        envelope: &Envelope,
        server_delivered_timestamp_ms: u64,
    ) -> Result<Vec<&'static str>, Error> {
        let _guard = self.process_lock().lock();

        let result = self.decrypt(envelope)?;

        let follow_ups = result.follow_ups().to_vec();
        let mut queues: Vec<&'static str> = follow_ups
            .iter()
            .flat_map(|chain| chain.queues())
            .collect();
        queues.sort_unstable();
        queues.dedup();

        self.process(result, now_ms())?;

        for chain in follow_ups {
            self.jobs().add_chain(chain);
        }

        Ok(queues)
    }

    /// The state machine for failed decryptions.
    ///
    /// A blocked sender's exception-path content is dropped before the
    /// dispatch. States with no handling arm are programming errors.
    fn handle_exception(
        &self,
        state: MessageState,
        metadata: ErrorMetadata,
        client_timestamp_ms: u64,
    ) -> Result<(), Error> {
        let sender = self.storage().resolve_service_id(&metadata.sender)?;

        if sender.blocked {
            tracing::warn!(
                target: "courier_core::processor",
                "[{}] Dropping exception content from blocked sender {}",
                client_timestamp_ms,
                sender.id
            );
            return Ok(());
        }

        match state {
            MessageState::InvalidVersion => {
                tracing::warn!(
                    target: "courier_core::processor",
                    "[{}] Invalid version from {}",
                    client_timestamp_ms,
                    sender.id
                );
                self.insert_error_placeholder(
                    &sender,
                    metadata.sender_device,
                    None,
                    client_timestamp_ms,
                    PlaceholderKind::InvalidVersion,
                )
            }
            MessageState::LegacyMessage => {
                tracing::warn!(
                    target: "courier_core::processor",
                    "[{}] Legacy message from {}",
                    client_timestamp_ms,
                    sender.id
                );
                self.insert_error_placeholder(
                    &sender,
                    metadata.sender_device,
                    None,
                    client_timestamp_ms,
                    PlaceholderKind::LegacyVersion,
                )
            }
            MessageState::DuplicateMessage => {
                tracing::warn!(
                    target: "courier_core::processor",
                    "[{}] Duplicate message from {}. Dropping.",
                    client_timestamp_ms,
                    sender.id
                );
                Ok(())
            }
            MessageState::UnsupportedDataMessage => {
                tracing::warn!(
                    target: "courier_core::processor",
                    "[{}] Unsupported data message from {}",
                    client_timestamp_ms,
                    sender.id
                );
                self.insert_error_placeholder(
                    &sender,
                    metadata.sender_device,
                    metadata.group_id.clone(),
                    client_timestamp_ms,
                    PlaceholderKind::UnsupportedData,
                )
            }
            MessageState::DecryptionError => {
                tracing::warn!(
                    target: "courier_core::processor",
                    "[{}] Decryption error from {}",
                    client_timestamp_ms,
                    sender.id
                );
                self.insert_error_placeholder(
                    &sender,
                    metadata.sender_device,
                    metadata.group_id.clone(),
                    client_timestamp_ms,
                    PlaceholderKind::DecryptionError,
                )
            }
            other => panic!("Unhandled message state: {:?}", other),
        }
    }

    /// Insert a placeholder row so the UI can render an explanatory state.
    ///
    /// The row lands in the group's thread when the failure could be
    /// attributed to a known group, otherwise in the sender's thread.
    pub(crate) fn insert_error_placeholder(
        &self,
        sender: &Recipient,
        sender_device: DeviceId,
        group_id: Option<GroupId>,
        client_timestamp_ms: u64,
        kind: PlaceholderKind,
    ) -> Result<(), Error> {
        let thread_recipient = match group_id {
            Some(ref group_id) => match self.storage().find_group(group_id)? {
                Some(group) => group.recipient,
                None => sender.id,
            },
            None => sender.id,
        };

        let thread = self.storage().get_or_create_thread(thread_recipient)?;
        let now = now_ms();

        self.storage().insert_message(NewMessage {
            thread,
            sender: sender.id,
            sender_device,
            sent_timestamp_ms: client_timestamp_ms,
            server_timestamp_ms: now,
            received_timestamp_ms: now,
            kind: MessageKind::Placeholder(kind),
            body: None,
            attachment_count: 0,
            expires_in_ms: None,
            outgoing: false,
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use courier_storage_traits::messages::MessageStorage;
    use courier_storage_traits::messages::types::MessageKind;
    use courier_storage_traits::recipients::RecipientStorage;
    use courier_storage_traits::threads::ThreadStorage;
    use courier_storage_traits::{DeviceId, ServiceId};

    use super::*;
    use crate::CourierConfig;
    use crate::test_util::*;

    #[test]
    fn test_invalid_version_inserts_placeholder() {
        let harness = create_test_courier(CourierConfig::default());
        let peer = ServiceId::from_bytes([2u8; 16]);

        let metadata = ErrorMetadata {
            sender: peer,
            sender_device: DeviceId::PRIMARY,
            group_id: None,
        };

        harness
            .courier
            .process(
                DecryptionResult::Error {
                    state: MessageState::InvalidVersion,
                    metadata,
                    client_timestamp_ms: 1000,
                    follow_ups: vec![],
                },
                2000,
            )
            .unwrap();

        let sender = harness.storage().resolve_service_id(&peer).unwrap();
        let thread = harness
            .storage()
            .thread_for_recipient(sender.id)
            .unwrap()
            .expect("thread should exist");
        let messages = harness.storage().messages_in_thread(thread).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].kind,
            MessageKind::Placeholder(PlaceholderKind::InvalidVersion)
        );
    }

    #[test]
    fn test_duplicate_mutates_nothing() {
        let harness = create_test_courier(CourierConfig::default());
        let peer = ServiceId::from_bytes([2u8; 16]);

        harness
            .courier
            .process(
                DecryptionResult::Error {
                    state: MessageState::DuplicateMessage,
                    metadata: ErrorMetadata {
                        sender: peer,
                        sender_device: DeviceId::PRIMARY,
                        group_id: None,
                    },
                    client_timestamp_ms: 1000,
                    follow_ups: vec![],
                },
                2000,
            )
            .unwrap();

        let sender = harness.storage().resolve_service_id(&peer).unwrap();
        assert!(harness
            .storage()
            .thread_for_recipient(sender.id)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_blocked_sender_exception_dropped() {
        let harness = create_test_courier(CourierConfig::default());
        let peer = ServiceId::from_bytes([2u8; 16]);

        let mut sender = harness.storage().resolve_service_id(&peer).unwrap();
        sender.blocked = true;
        harness.storage().save_recipient(sender.clone()).unwrap();

        harness
            .courier
            .process(
                DecryptionResult::Error {
                    state: MessageState::InvalidVersion,
                    metadata: ErrorMetadata {
                        sender: peer,
                        sender_device: DeviceId::PRIMARY,
                        group_id: None,
                    },
                    client_timestamp_ms: 1000,
                    follow_ups: vec![],
                },
                2000,
            )
            .unwrap();

        assert!(harness
            .storage()
            .thread_for_recipient(sender.id)
            .unwrap()
            .is_none());
    }

    #[test]
    #[should_panic(expected = "Unhandled message state")]
    fn test_unhandled_state_panics() {
        let harness = create_test_courier(CourierConfig::default());
        let peer = ServiceId::from_bytes([2u8; 16]);

        let _ = harness.courier.process(
            DecryptionResult::Error {
                state: MessageState::NoSession,
                metadata: ErrorMetadata {
                    sender: peer,
                    sender_device: DeviceId::PRIMARY,
                    group_id: None,
                },
                client_timestamp_ms: 1000,
                follow_ups: vec![],
            },
            2000,
        );
    }

    /// Mutual exclusion: N threads processing M envelopes each must never
    /// overlap inside the critical section, and insertion order must be
    /// consistent with lock-acquisition order.
    #[test]
    fn test_processor_mutual_exclusion() {
        let harness = Arc::new(create_test_courier(CourierConfig::default()));
        let in_section = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let threads = 4;
        let per_thread = 25;

        let mut handles = Vec::new();
        for t in 0..threads {
            let harness = Arc::clone(&harness);
            let in_section = Arc::clone(&in_section);
            let overlaps = Arc::clone(&overlaps);

            handles.push(std::thread::spawn(move || {
                let peer = ServiceId::from_bytes([10 + t as u8; 16]);
                for i in 0..per_thread {
                    let timestamp = (t as u64) * 1_000_000 + i as u64;
                    let mut envelope = test_envelope(timestamp);
                    envelope.server_guid = format!("{}-{}", t, i);
                    harness.cipher.script_success(
                        &envelope,
                        text_content(&format!("msg {} {}", t, i)),
                        success_metadata(peer),
                    );

                    // The cipher callback flags overlapping entries
                    let in_section = Arc::clone(&in_section);
                    let overlaps = Arc::clone(&overlaps);
                    harness.cipher.on_decrypt(move || {
                        if in_section.swap(true, Ordering::SeqCst) {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        std::thread::yield_now();
                        in_section.store(false, Ordering::SeqCst);
                    });

                    harness.courier.process_envelope(&envelope, 0).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            overlaps.load(Ordering::SeqCst),
            0,
            "no two invocations may overlap inside the critical section"
        );

        // Every message made it to storage exactly once
        let mut total = 0;
        for t in 0..threads {
            let peer = ServiceId::from_bytes([10 + t as u8; 16]);
            let sender = harness.storage().resolve_service_id(&peer).unwrap();
            let thread = harness
                .storage()
                .thread_for_recipient(sender.id)
                .unwrap()
                .expect("thread should exist");
            let messages = harness.storage().messages_in_thread(thread).unwrap();
            assert_eq!(messages.len(), per_thread);

            // Within one sender, insertion order follows lock-acquisition
            // order, which for a single thread is send order
            let mut ids: Vec<u64> = messages.iter().map(|m| m.id.value()).collect();
            let mut sorted = ids.clone();
            sorted.sort_unstable();
            assert_eq!(ids, sorted);
            ids.dedup();
            assert_eq!(ids.len(), per_thread);

            total += messages.len();
        }
        assert_eq!(total, threads * per_thread);
    }
}
