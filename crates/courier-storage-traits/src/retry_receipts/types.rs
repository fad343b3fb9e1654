//! Types for the pending retry receipts module

use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, RecipientId, ThreadId};

/// Records that a decryption failure triggered a retry request.
///
/// Keyed by (author, sent timestamp); consumed and deleted once the
/// matching content is later successfully processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRetryReceipt {
    /// Who sent the message we failed to decrypt
    pub author: RecipientId,
    /// The author's device
    pub device: DeviceId,
    /// The failed message's client-sent timestamp (milliseconds)
    pub sent_timestamp_ms: u64,
    /// When we originally received the failed message (milliseconds)
    pub received_timestamp_ms: u64,
    /// The thread the failed message belonged to
    pub thread: ThreadId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_retry_serialization() {
        let pending = PendingRetryReceipt {
            author: RecipientId::new(3),
            device: DeviceId::new(2),
            sent_timestamp_ms: 555,
            received_timestamp_ms: 600,
            thread: ThreadId::new(8),
        };

        let json = serde_json::to_string(&pending).unwrap();
        let back: PendingRetryReceipt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pending);
    }
}
