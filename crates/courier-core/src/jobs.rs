//! Background jobs spawned by the pipeline.
//!
//! The pipeline never performs network sends or slow recovery work inline;
//! it enqueues jobs on an external queue and, where ordering matters,
//! chains them. Each job belongs to a named queue so retrieval strategies
//! can wait for the queues they touched to drain (via a marker job).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use courier_storage_traits::resend_log::types::ContentHint;
use courier_storage_traits::{DeviceId, DistributionId, GroupId, RecipientId};

use crate::content::{CallMessage, SyncMessage};

/// A unit of background work the pipeline hands off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Job {
    /// Replenish our prekeys with the server
    RefreshPreKeys {
        /// Force rotation of the signed prekey as well
        force_rotation: bool,
    },
    /// Archive sessions with a desynced peer device and establish a fresh
    /// one, inserting a chat event for the reset
    AutomaticSessionReset {
        /// The desynced peer
        sender: RecipientId,
        /// The peer device
        device: DeviceId,
        /// Client-sent timestamp of the message that failed
        timestamp_ms: u64,
    },
    /// Ask a peer to resend a message we failed to decrypt
    SendRetryReceipt {
        /// The peer to ask
        sender: RecipientId,
        /// The group the failed message addressed, when known
        group_id: Option<GroupId>,
        /// The original ciphertext the request references
        original: Vec<u8>,
    },
    /// Resend a previously sent ciphertext from the resend log
    ResendMessage {
        /// The requesting peer
        recipient: RecipientId,
        /// Client-sent timestamp of the original send
        sent_timestamp_ms: u64,
        /// The logged ciphertext, exactly as first sent
        content: Vec<u8>,
        /// The content hint the ciphertext carried
        content_hint: ContentHint,
        /// Whether the original send was urgent
        urgent: bool,
        /// The group the original send addressed, when it was a group send
        group_id: Option<GroupId>,
        /// The distribution used for the original shared-key send
        distribution_id: Option<DistributionId>,
    },
    /// Send a content-free message so a peer's session reset completes
    SendNullMessage {
        /// The peer
        recipient: RecipientId,
    },
    /// Send a peer a fresh sender key distribution message, after checking
    /// they are still a member of the distribution's group
    SendSenderKeyDistribution {
        /// The requesting peer
        recipient: RecipientId,
        /// The recipient representing the group conversation
        thread_recipient: RecipientId,
    },
    /// Re-fetch a recipient's profile
    RefreshProfile {
        /// The recipient
        recipient: RecipientId,
    },
    /// Acknowledge delivery of a message to its sender
    SendDeliveryReceipt {
        /// The message sender
        recipient: RecipientId,
        /// Client-sent timestamp of the delivered message
        sent_timestamp_ms: u64,
    },
    /// Push our profile key to a 1:1 peer or into a group
    PushProfileKey {
        /// The 1:1 peer, for individual pushes
        recipient: Option<RecipientId>,
        /// The group, for group pushes
        group_id: Option<GroupId>,
    },
    /// Ask a legacy group's sender for current group info
    RequestGroupInfo {
        /// The unknown group
        group_id: GroupId,
        /// The member to ask
        sender: RecipientId,
    },
    /// Refresh a new-style group's state from the server
    RefreshGroup {
        /// The group
        group_id: GroupId,
    },
    /// Hand call signaling to the calling subsystem
    DispatchCallMessage {
        /// The caller
        sender: RecipientId,
        /// The caller's device
        sender_device: DeviceId,
        /// The signaling payload
        message: CallMessage,
    },
    /// Hand a sync payload to the multi-device subsystem
    ProcessSyncMessage {
        /// Which of our devices sent it
        sender_device: DeviceId,
        /// The sync payload
        message: SyncMessage,
    },
}

impl Job {
    /// The queue this job runs on.
    ///
    /// Retrieval strategies track these names to know which queues to wait
    /// on after a drain.
    pub fn queue(&self) -> &'static str {
        match self {
            Self::RefreshPreKeys { .. } => "prekeys",
            Self::AutomaticSessionReset { .. } => "session-reset",
            Self::SendRetryReceipt { .. } => "retry-receipts",
            Self::ResendMessage { .. } => "resend",
            Self::SendNullMessage { .. } => "resend",
            Self::SendSenderKeyDistribution { .. } => "resend",
            Self::RefreshProfile { .. } => "profiles",
            Self::SendDeliveryReceipt { .. } => "receipts",
            Self::PushProfileKey { .. } => "profiles",
            Self::RequestGroupInfo { .. } => "groups",
            Self::RefreshGroup { .. } => "groups",
            Self::DispatchCallMessage { .. } => "calls",
            Self::ProcessSyncMessage { .. } => "sync",
        }
    }
}

/// An ordered chain of jobs: each runs only after the previous completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobChain {
    jobs: Vec<Job>,
}

impl JobChain {
    /// A chain of one job
    pub fn single(job: Job) -> Self {
        Self { jobs: vec![job] }
    }

    /// A chain of jobs in order
    pub fn of(jobs: Vec<Job>) -> Self {
        Self { jobs }
    }

    /// The jobs in chain order
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Queue names touched by this chain
    pub fn queues(&self) -> Vec<&'static str> {
        self.jobs.iter().map(Job::queue).collect()
    }
}

/// The external background job queue.
///
/// The pipeline only enqueues and waits; scheduling, retry, and backoff
/// policy belong to the queue implementation.
pub trait JobQueue: Send + Sync {
    /// Enqueue a single job
    fn add(&self, job: Job);

    /// Enqueue a chain of jobs with ordering between them
    fn add_chain(&self, chain: JobChain);

    /// Enqueue a marker on the named queue and block until the marker is
    /// dequeued, as a proxy for "queue empty". Returns `false` on timeout.
    fn drain_queue(&self, queue: &str, timeout: Duration) -> bool;

    /// Register a listener invoked for every job enqueued on a queue whose
    /// name starts with `queue_prefix`
    fn add_listener(&self, queue_prefix: &str, listener: Box<dyn Fn(&Job) + Send + Sync>);
}
