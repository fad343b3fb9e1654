//! Threads module
//!
//! Minimal conversation bookkeeping: the pipeline needs to map recipients
//! to threads, find a thread's recipient again (retry receipts resolve
//! their group through this), and read the last-seen marker when deciding
//! which received-timestamp to use for a replayed message.

use crate::ids::{RecipientId, ThreadId};

pub mod error;

use self::error::ThreadError;

/// Storage traits for the threads module
pub trait ThreadStorage {
    /// The thread for a recipient, if one exists
    fn thread_for_recipient(&self, recipient: RecipientId)
    -> Result<Option<ThreadId>, ThreadError>;

    /// The thread for a recipient, creating it if absent
    fn get_or_create_thread(&self, recipient: RecipientId) -> Result<ThreadId, ThreadError>;

    /// The recipient a thread belongs to
    fn thread_recipient(&self, thread: ThreadId) -> Result<Option<RecipientId>, ThreadError>;

    /// When the user last viewed the thread (milliseconds), if ever
    fn last_seen(&self, thread: ThreadId) -> Result<Option<u64>, ThreadError>;

    /// Update the last-seen marker for a thread
    fn set_last_seen(&self, thread: ThreadId, timestamp_ms: u64) -> Result<(), ThreadError>;
}
