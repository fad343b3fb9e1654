//! The outbound fan-out sender.
//!
//! Decides, per send, whether to use the shared-group (sender key)
//! channel or fall back to pairwise encryption per recipient, with
//! automatic wholesale demotion on cryptographic failure and logging of
//! resendable outcomes into the resend log.

pub mod operation;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use courier_storage_traits::recipients::types::Recipient;
use courier_storage_traits::resend_log::types::{LogEntryId, NewLogEntry};
use courier_storage_traits::secret::Secret;
use courier_storage_traits::{
    CourierStorageProvider, DeviceId, DistributionId, GroupId, ProtocolAddress, RecipientId,
    ServiceId,
};

use crate::error::Error;
use crate::util::{now_ms, CancellationFlag};
use crate::Courier;

pub use self::operation::SendOperation;

/// Per-target outcome of a fan-out send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    /// The target
    pub recipient: RecipientId,
    /// What happened
    pub outcome: SendOutcome,
}

impl SendResult {
    /// Whether the send reached the target
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SendOutcome::Success { .. })
    }
}

/// What happened to one target of a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered to the server for this target
    Success {
        /// Whether the send went over the sealed channel
        sealed: bool,
    },
    /// A network-level failure for this target only
    NetworkFailure,
    /// The target's identity key changed; sending would be unsafe
    IdentityFailure,
    /// The target is not registered (or has no stable identifier)
    Unregistered,
}

/// A wire-level result, keyed by protocol address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireSendResult {
    /// The addressed device
    pub address: ProtocolAddress,
    /// What happened
    pub outcome: SendOutcome,
}

/// A failure of the whole shared-key batch.
///
/// Any of these demotes every sender-key target to the pairwise path;
/// a partial shared-key failure is never partially retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SenderKeyBatchError {
    /// A target had a bad sealed-sender access header
    #[error("invalid access header")]
    InvalidAccessHeader,
    /// A target had no established session
    #[error("no session")]
    NoSession,
    /// A target's key material was invalid
    #[error("invalid key")]
    InvalidKey,
    /// A target presented an invalid registration id
    #[error("invalid registration id")]
    InvalidRegistrationId,
    /// A target was unregistered server-side
    #[error("recipient unregistered")]
    RecipientUnregistered,
}

/// The wire-level sender: encrypts and submits ciphertexts.
///
/// Session establishment, sealed-sender enveloping, and device fan-out
/// live behind this trait.
pub trait WireSender: Send + Sync {
    /// Encrypt once for the whole distribution and submit to all targets.
    /// Fails as a batch.
    fn send_with_sender_key(
        &self,
        distribution_id: DistributionId,
        targets: &[ProtocolAddress],
        operation: &SendOperation,
        is_recipient_update: bool,
    ) -> Result<Vec<WireSendResult>, SenderKeyBatchError>;

    /// Encrypt pairwise for one target and submit.
    fn send_pairwise(
        &self,
        target: ProtocolAddress,
        access_key: Option<&Secret<[u8; 16]>>,
        operation: &SendOperation,
        is_recipient_update: bool,
    ) -> WireSendResult;

    /// The serialized content of the operation, exactly as sent. Stored
    /// in the resend log for exact resends.
    fn serialized_content(&self, operation: &SendOperation) -> Vec<u8>;
}

/// Keyed recipient bookkeeping for one send.
///
/// Everything the send needs per target is resolved once and looked up by
/// recipient id afterwards - no positional alignment between parallel
/// lists.
struct SendTargets {
    info: HashMap<RecipientId, TargetInfo>,
    by_address: HashMap<ServiceId, RecipientId>,
}

struct TargetInfo {
    address: ProtocolAddress,
    access_key: Option<Secret<[u8; 16]>>,
}

impl SendTargets {
    fn new() -> Self {
        Self {
            info: HashMap::new(),
            by_address: HashMap::new(),
        }
    }

    fn insert(&mut self, recipient: &Recipient) -> Result<(), Error> {
        let service_id = recipient.require_service_id()?;
        self.info.insert(
            recipient.id,
            TargetInfo {
                address: ProtocolAddress::new(service_id, DeviceId::PRIMARY),
                access_key: recipient.access_key.clone(),
            },
        );
        self.by_address.insert(service_id, recipient.id);
        Ok(())
    }

    fn address(&self, id: RecipientId) -> ProtocolAddress {
        self.info[&id].address
    }

    fn access_key(&self, id: RecipientId) -> Option<&Secret<[u8; 16]>> {
        self.info[&id].access_key.as_ref()
    }

    fn recipient_for(&self, address: &ProtocolAddress) -> Option<RecipientId> {
        self.by_address.get(&address.service_id).copied()
    }
}

impl<Storage> Courier<Storage>
where
    Storage: CourierStorageProvider,
{
    /// Fan a message out to a set of targets.
    ///
    /// Uses the shared-group channel where eligible and falls back to
    /// pairwise sends, reporting exactly one result per target (including
    /// unregistered targets, reported as failures). `group_id` is `None`
    /// when sending to a collection of recipients not joined by a group.
    #[allow(clippy::too_many_arguments)]
    pub fn send_to_group(
        &self,
        wire: &Arc<dyn WireSender>,
        group_id: Option<&GroupId>,
        distribution_id: Option<DistributionId>,
        targets: &[RecipientId],
        is_recipient_update: bool,
        operation: &SendOperation,
        cancel: Option<&CancellationFlag>,
    ) -> Result<Vec<SendResult>, Error> {
        tracing::info!(
            target: "courier_core::sender",
            "Starting group send. GroupId: {}, DistributionId: {}, Targets: {}, RecipientUpdate: {}",
            group_id.map(|g| g.to_string()).unwrap_or_else(|| "none".to_string()),
            distribution_id.map(|d| d.to_string()).unwrap_or_else(|| "none".to_string()),
            targets.len(),
            is_recipient_update
        );

        let group = match group_id {
            Some(group_id) => self.storage().find_group(group_id)?,
            None => None,
        };

        // Partition unregistered targets out first; they short-circuit to
        // failure results
        let mut unregistered: Vec<RecipientId> = Vec::new();
        let mut registered: Vec<Recipient> = Vec::new();

        for &target in targets {
            match self.storage().find_recipient(target)? {
                Some(recipient)
                    if recipient.service_id.is_some() && !recipient.is_unregistered() =>
                {
                    registered.push(recipient);
                }
                _ => unregistered.push(target),
            }
        }

        let mut send_targets = SendTargets::new();
        for recipient in &registered {
            send_targets.insert(recipient)?;
        }

        // Eligibility: capability, stable id, access credential, and (for
        // group sends) current membership
        let mut sender_key_targets: Vec<RecipientId> = Vec::new();
        let mut legacy_targets: Vec<RecipientId> = Vec::new();

        for recipient in &registered {
            let valid_membership = match (&group_id, &group) {
                (None, _) => true,
                (Some(_), Some(group)) => group.members.contains(&recipient.id),
                (Some(_), None) => false,
            };

            if recipient.sender_key_capable
                && recipient.access_key.is_some()
                && valid_membership
            {
                sender_key_targets.push(recipient.id);
            } else {
                legacy_targets.push(recipient.id);
            }
        }

        // Kill switches demote every sender-key target wholesale
        if distribution_id.is_none() {
            tracing::info!(target: "courier_core::sender", "No distribution id. Using legacy.");
            legacy_targets.append(&mut sender_key_targets);
        } else if !self.config.sender_key_enabled {
            tracing::info!(
                target: "courier_core::sender",
                "Sender key disabled on this device. Using legacy."
            );
            legacy_targets.append(&mut sender_key_targets);
        } else if self.config.remove_sender_key_minimum {
            tracing::info!(
                target: "courier_core::sender",
                "Sender key minimum removed. Using for {} recipients.",
                sender_key_targets.len()
            );
        } else if sender_key_targets.len() < 2 {
            tracing::info!(
                target: "courier_core::sender",
                "Too few sender-key-capable users ({}). Doing all legacy sends.",
                sender_key_targets.len()
            );
            legacy_targets.append(&mut sender_key_targets);
        } else {
            tracing::info!(
                target: "courier_core::sender",
                "Can use sender key for {}/{} recipients.",
                sender_key_targets.len(),
                targets.len()
            );
        }

        let mut all_results: Vec<SendResult> = Vec::with_capacity(targets.len());

        if !sender_key_targets.is_empty() {
            let distribution_id = distribution_id.expect("kill switch guarantees presence");

            self.rotate_sender_key_if_stale(&distribution_id)?;

            let addresses: Vec<ProtocolAddress> = sender_key_targets
                .iter()
                .map(|&id| send_targets.address(id))
                .collect();

            match wire.send_with_sender_key(
                distribution_id,
                &addresses,
                operation,
                is_recipient_update,
            ) {
                Ok(results) => {
                    let successes: Vec<ProtocolAddress> = results
                        .iter()
                        .filter(|r| matches!(r.outcome, SendOutcome::Success { .. }))
                        .map(|r| r.address)
                        .collect();

                    tracing::debug!(
                        target: "courier_core::sender",
                        "Successfully sent using sender key to {}/{} sender key targets.",
                        successes.len(),
                        addresses.len()
                    );

                    self.storage()
                        .mark_sender_key_shared_with(&distribution_id, &successes)?;

                    if operation.should_log() {
                        self.storage().insert_log_entry(NewLogEntry {
                            recipients: successes
                                .iter()
                                .filter_map(|address| {
                                    send_targets
                                        .recipient_for(address)
                                        .map(|id| (id, address.device_id))
                                })
                                .collect(),
                            sent_timestamp_ms: operation.sent_timestamp_ms(),
                            content: wire.serialized_content(operation),
                            content_hint: operation.content_hint(),
                            urgent: operation.is_urgent(),
                            related_message_id: Some(operation.related_message_id()),
                        })?;
                    }

                    for result in results {
                        if let Some(recipient) = send_targets.recipient_for(&result.address) {
                            all_results.push(SendResult {
                                recipient,
                                outcome: result.outcome,
                            });
                        }
                    }
                }
                Err(e) => {
                    // A shared-key batch failure is never partially
                    // retried: every target moves to the pairwise path
                    tracing::warn!(
                        target: "courier_core::sender",
                        "Sender key send failed ({}). Falling back to legacy sends.",
                        e
                    );
                    legacy_targets.append(&mut sender_key_targets);
                }
            }
        }

        if let Some(cancel) = cancel {
            if cancel.is_canceled() {
                return Err(Error::Canceled);
            }
        }

        let sync_only_send =
            legacy_targets.is_empty() && all_results.is_empty() && self.config.multi_device;

        if !legacy_targets.is_empty() || sync_only_send {
            if legacy_targets.is_empty() {
                tracing::info!(
                    target: "courier_core::sender",
                    "Need to do a legacy send to send a sync message for a group of only ourselves."
                );
                let me = self.storage().self_recipient()?;
                let address = ProtocolAddress::new(me.require_service_id()?, DeviceId::PRIMARY);
                // Sync sends target our own devices and produce no
                // per-target result
                let _ = wire.send_pairwise(address, None, operation, is_recipient_update);
            } else {
                tracing::info!(
                    target: "courier_core::sender",
                    "Need to do {} legacy sends.",
                    legacy_targets.len()
                );

                let recipient_update = is_recipient_update || !all_results.is_empty();
                let results = self.send_legacy(
                    wire,
                    &send_targets,
                    &legacy_targets,
                    operation,
                    recipient_update,
                    cancel,
                )?;

                let success_count = results.iter().filter(|r| r.is_success()).count();
                tracing::debug!(
                    target: "courier_core::sender",
                    "Successfully sent using 1:1 to {}/{} legacy targets.",
                    success_count,
                    legacy_targets.len()
                );

                all_results.extend(results);
            }
        }

        if !unregistered.is_empty() {
            tracing::warn!(
                target: "courier_core::sender",
                "There are {} unregistered targets. Including failure results.",
                unregistered.len()
            );
            all_results.extend(unregistered.into_iter().map(|recipient| SendResult {
                recipient,
                outcome: SendOutcome::Unregistered,
            }));
        }

        Ok(all_results)
    }

    /// Pairwise sends with incremental resend log appends: the first
    /// logged result creates the entry, subsequent results for the same
    /// logical send attach to it.
    fn send_legacy(
        &self,
        wire: &Arc<dyn WireSender>,
        send_targets: &SendTargets,
        legacy_targets: &[RecipientId],
        operation: &SendOperation,
        is_recipient_update: bool,
        cancel: Option<&CancellationFlag>,
    ) -> Result<Vec<SendResult>, Error> {
        let entry_id: Mutex<Option<LogEntryId>> = Mutex::new(None);
        let include_in_log = operation.should_log();

        let mut results: Vec<SendResult> = Vec::with_capacity(legacy_targets.len());

        for &target in legacy_targets {
            if let Some(cancel) = cancel {
                if cancel.is_canceled() {
                    return Err(Error::Canceled);
                }
            }

            let address = send_targets.address(target);
            let result = wire.send_pairwise(
                address,
                send_targets.access_key(target),
                operation,
                is_recipient_update,
            );

            if include_in_log && matches!(result.outcome, SendOutcome::Success { .. }) {
                let mut guard = entry_id.lock();
                match *guard {
                    None => {
                        let id = self.storage().insert_log_entry(NewLogEntry {
                            recipients: vec![(target, address.device_id)],
                            sent_timestamp_ms: operation.sent_timestamp_ms(),
                            content: wire.serialized_content(operation),
                            content_hint: operation.content_hint(),
                            urgent: operation.is_urgent(),
                            related_message_id: Some(operation.related_message_id()),
                        })?;
                        *guard = Some(id);
                    }
                    Some(id) => {
                        self.storage()
                            .append_log_recipient(id, target, address.device_id)?;
                    }
                }
            }

            results.push(SendResult {
                recipient: target,
                outcome: result.outcome,
            });
        }

        Ok(results)
    }

    fn rotate_sender_key_if_stale(
        &self,
        distribution_id: &DistributionId,
    ) -> Result<(), Error> {
        if let Some(created_ms) = self.storage().sender_key_create_time(distribution_id)? {
            let age_ms = now_ms().saturating_sub(created_ms);
            if age_ms > self.config.sender_key_max_age_ms {
                tracing::warn!(
                    target: "courier_core::sender",
                    "Sender key for {} is {} ms old. Rotating.",
                    distribution_id,
                    age_ms
                );
                self.storage().rotate_sender_key(distribution_id)?;
            }
        }
        Ok(())
    }
}
