//! Shared helpers for tests

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use courier_memory_storage::MemoryStorage;
use courier_storage_traits::groups::types::{Group, GroupVersion};
use courier_storage_traits::recipients::RecipientStorage;
use courier_storage_traits::recipients::types::{Recipient, RegistrationState};
use courier_storage_traits::secret::Secret;
use courier_storage_traits::{DeviceId, GroupId, RecipientId, ServiceId};

use crate::cipher::{CipherError, CipherResult, EnvelopeCipher};
use crate::content::{Content, DataMessage, DataPayload, EnvelopeMetadata};
use crate::envelope::{Envelope, EnvelopeKind};
use crate::jobs::{Job, JobChain, JobQueue};
use crate::transport::{Transport, TransportError};
use crate::{Courier, CourierConfig};

/// The local account's service id in tests
pub fn local_service_id() -> ServiceId {
    ServiceId::from_bytes([0xaa; 16])
}

/// A cipher scripted per envelope, keyed by server GUID.
#[derive(Default)]
pub struct FakeCipher {
    script: Mutex<HashMap<String, Scripted>>,
    hook: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

enum Scripted {
    Success(Content, EnvelopeMetadata),
    Error(CipherError),
}

impl FakeCipher {
    /// Script a successful decryption for this envelope
    pub fn script_success(&self, envelope: &Envelope, content: Content, metadata: EnvelopeMetadata) {
        self.script.lock().insert(
            envelope.server_guid.clone(),
            Scripted::Success(content, metadata),
        );
    }

    /// Script a failure for this envelope
    pub fn script_error(&self, envelope: &Envelope, error: CipherError) {
        self.script
            .lock()
            .insert(envelope.server_guid.clone(), Scripted::Error(error));
    }

    /// Install a hook invoked inside every decrypt call
    pub fn on_decrypt(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.hook.lock() = Some(Arc::new(hook));
    }
}

impl EnvelopeCipher for FakeCipher {
    fn decrypt(&self, envelope: &Envelope) -> Result<Option<CipherResult>, CipherError> {
        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }

        match self.script.lock().get(&envelope.server_guid) {
            Some(Scripted::Success(content, metadata)) => Ok(Some(CipherResult {
                content: content.clone(),
                metadata: metadata.clone(),
            })),
            Some(Scripted::Error(error)) => Err(error.clone()),
            None => Ok(None),
        }
    }
}

/// A job queue that records everything and drains instantly.
#[derive(Default)]
pub struct RecordingJobQueue {
    added: Mutex<Vec<Job>>,
    drained: Mutex<Vec<String>>,
    block_drains: Mutex<bool>,
    listeners: Mutex<Vec<(String, Box<dyn Fn(&Job) + Send + Sync>)>>,
}

impl RecordingJobQueue {
    /// All jobs enqueued so far, in order
    pub fn jobs(&self) -> Vec<Job> {
        self.added.lock().clone()
    }

    /// Queues drained so far
    pub fn drained_queues(&self) -> Vec<String> {
        self.drained.lock().clone()
    }

    /// Make subsequent drain calls time out
    pub fn block_drains(&self) {
        *self.block_drains.lock() = true;
    }
}

impl RecordingJobQueue {
    fn notify(&self, job: &Job) {
        for (prefix, listener) in self.listeners.lock().iter() {
            if job.queue().starts_with(prefix.as_str()) {
                listener(job);
            }
        }
    }
}

impl JobQueue for RecordingJobQueue {
    fn add(&self, job: Job) {
        self.notify(&job);
        self.added.lock().push(job);
    }

    fn add_chain(&self, chain: JobChain) {
        for job in chain.jobs() {
            self.notify(job);
        }
        self.added.lock().extend(chain.jobs().iter().cloned());
    }

    fn drain_queue(&self, queue: &str, _timeout: Duration) -> bool {
        self.drained.lock().push(queue.to_string());
        !*self.block_drains.lock()
    }

    fn add_listener(&self, queue_prefix: &str, listener: Box<dyn Fn(&Job) + Send + Sync>) {
        self.listeners
            .lock()
            .push((queue_prefix.to_string(), listener));
    }
}

/// A transport fed from scripted envelope queues.
#[derive(Default)]
pub struct ScriptedTransport {
    stream: Mutex<VecDeque<Envelope>>,
    batch: Mutex<VecDeque<Envelope>>,
    retrieve_error: Mutex<Option<TransportError>>,
    connects: Mutex<usize>,
    disconnects: Mutex<usize>,
    resets: Mutex<usize>,
}

impl ScriptedTransport {
    /// Queue an envelope on the persistent-connection stream
    pub fn push_stream(&self, envelope: Envelope) {
        self.stream.lock().push_back(envelope);
    }

    /// Queue an envelope for polling retrieval
    pub fn push_batch(&self, envelope: Envelope) {
        self.batch.lock().push_back(envelope);
    }

    /// Make the next polling retrieval fail
    pub fn fail_retrieve(&self, error: TransportError) {
        *self.retrieve_error.lock() = Some(error);
    }

    /// Number of reset calls so far
    pub fn reset_count(&self) -> usize {
        *self.resets.lock()
    }

    /// Number of disconnect calls so far
    pub fn disconnect_count(&self) -> usize {
        *self.disconnects.lock()
    }
}

impl Transport for ScriptedTransport {
    fn connect(&self) -> Result<(), TransportError> {
        *self.connects.lock() += 1;
        Ok(())
    }

    fn disconnect(&self) {
        *self.disconnects.lock() += 1;
    }

    fn read_or_empty(
        &self,
        _timeout: Duration,
        on_envelope: &mut dyn FnMut(Envelope),
    ) -> Result<Option<Envelope>, TransportError> {
        match self.stream.lock().pop_front() {
            Some(envelope) => {
                on_envelope(envelope.clone());
                Ok(Some(envelope))
            }
            None => Ok(None),
        }
    }

    fn retrieve_messages(
        &self,
        _include_stories: bool,
        on_envelope: &mut dyn FnMut(Envelope),
    ) -> Result<(), TransportError> {
        if let Some(error) = self.retrieve_error.lock().take() {
            return Err(error);
        }
        while let Some(envelope) = self.batch.lock().pop_front() {
            on_envelope(envelope);
        }
        Ok(())
    }

    fn reset(&self) {
        *self.resets.lock() += 1;
    }
}

/// Everything a test needs in one place.
pub struct TestHarness {
    /// The pipeline under test
    pub courier: Courier<MemoryStorage>,
    /// The scripted cipher behind it
    pub cipher: Arc<FakeCipher>,
    /// The recording job queue behind it
    pub jobs: Arc<RecordingJobQueue>,
}

impl TestHarness {
    /// The memory storage behind the pipeline
    pub fn storage(&self) -> &MemoryStorage {
        self.courier.storage()
    }
}

/// Create a pipeline over memory storage with a scripted cipher
pub fn create_test_courier(config: CourierConfig) -> TestHarness {
    let cipher = Arc::new(FakeCipher::default());
    let jobs = Arc::new(RecordingJobQueue::default());

    let courier = Courier::builder(
        MemoryStorage::new(local_service_id()),
        Arc::<FakeCipher>::clone(&cipher) as Arc<dyn EnvelopeCipher>,
        Arc::<RecordingJobQueue>::clone(&jobs) as Arc<dyn JobQueue>,
    )
    .with_config(config)
    .build();

    TestHarness {
        courier,
        cipher,
        jobs,
    }
}

/// An envelope addressed to the local account
pub fn test_envelope(client_timestamp_ms: u64) -> Envelope {
    Envelope {
        source_service_id: None,
        source_device: DeviceId::PRIMARY,
        destination_service_id: Some(local_service_id()),
        kind: EnvelopeKind::Ciphertext,
        server_timestamp_ms: client_timestamp_ms + 5,
        client_timestamp_ms,
        server_guid: format!("guid-{}", client_timestamp_ms),
        payload: vec![0xcc; 16],
        urgent: true,
    }
}

/// Success metadata for a sender, sealed by default
pub fn success_metadata(sender: ServiceId) -> EnvelopeMetadata {
    EnvelopeMetadata {
        source_service_id: sender,
        source_device: DeviceId::PRIMARY,
        destination_service_id: local_service_id(),
        sealed_sender: true,
        group_id: None,
    }
}

/// A plain text data message content
pub fn text_content(body: &str) -> Content {
    Content::Data(DataMessage {
        sent_timestamp_ms: 0,
        group: None,
        profile_key: None,
        expires_in_ms: None,
        payload: DataPayload::Text {
            body: body.to_string(),
        },
    })
}

/// A plain text data message content with an explicit sent timestamp
pub fn text_content_at(body: &str, sent_timestamp_ms: u64) -> Content {
    Content::Data(DataMessage {
        sent_timestamp_ms,
        group: None,
        profile_key: None,
        expires_in_ms: None,
        payload: DataPayload::Text {
            body: body.to_string(),
        },
    })
}

/// Create a registered, sender-key-capable peer with an access key
pub fn register_peer(storage: &MemoryStorage, byte: u8) -> Recipient {
    let service_id = ServiceId::from_bytes([byte; 16]);
    let mut recipient = storage.resolve_service_id(&service_id).unwrap();
    recipient.registration = RegistrationState::Registered;
    recipient.sender_key_capable = true;
    recipient.access_key = Some(Secret::new([byte; 16]));
    storage.save_recipient(recipient.clone()).unwrap();
    recipient
}

/// Create an active V2 group with the given members
pub fn create_test_group(
    storage: &MemoryStorage,
    id_bytes: &[u8],
    members: &[RecipientId],
    admins: &[RecipientId],
) -> Group {
    use courier_storage_traits::groups::GroupStorage;

    let group_recipient = storage
        .resolve_service_id(&ServiceId::from_bytes([0xf0 ^ id_bytes[0]; 16]))
        .unwrap();

    let group = Group {
        id: GroupId::from_slice(id_bytes),
        version: GroupVersion::V2,
        master_key: Some(Secret::new([0x42; 32])),
        revision: 1,
        active: true,
        announcement_only: false,
        members: members.to_vec(),
        admins: admins.to_vec(),
        distribution_id: None,
        recipient: group_recipient.id,
    };

    storage.save_group(group.clone()).unwrap();
    group
}
