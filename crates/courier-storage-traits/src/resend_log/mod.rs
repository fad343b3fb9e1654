//! Resend log module
//!
//! The resend log records outbound ciphertexts keyed by (recipient, device,
//! sent timestamp) so that a peer's retry receipt can be answered with an
//! exact resend. Entries are pruned when the recipient acknowledges the
//! message with a delivery or read receipt.

use crate::ids::{DeviceId, RecipientId};

pub mod error;
pub mod types;

use self::error::ResendLogError;
use self::types::*;

/// Storage traits for the resend log
pub trait MessageLogStorage {
    /// Insert a new log entry, returning its id.
    ///
    /// The first send result for a logical send creates the entry; results
    /// that complete later are attached with
    /// [`MessageLogStorage::append_log_recipient`].
    fn insert_log_entry(&self, entry: NewLogEntry) -> Result<LogEntryId, ResendLogError>;

    /// Attach another recipient/device to an existing entry
    fn append_log_recipient(
        &self,
        entry: LogEntryId,
        recipient: RecipientId,
        device: DeviceId,
    ) -> Result<LogEntryId, ResendLogError>;

    /// Find the entry for a (recipient, device, sent timestamp) triple
    fn find_log_entry(
        &self,
        recipient: RecipientId,
        device: DeviceId,
        sent_timestamp_ms: u64,
    ) -> Result<Option<MessageLogEntry>, ResendLogError>;

    /// Remove a recipient's claim on any entries at the given timestamp,
    /// deleting entries that no longer have recipients.
    ///
    /// Called when a delivery or read receipt arrives.
    fn prune_log_for_receipt(
        &self,
        recipient: RecipientId,
        sent_timestamp_ms: u64,
    ) -> Result<(), ResendLogError>;
}
