//! Runs the pipeline end to end over the in-memory backend.
//!
//! A transparent cipher stands in for the real ratchet: envelope payloads
//! are treated as UTF-8 text from a fixed peer. Run with:
//!
//! ```sh
//! cargo run --example pipeline_memory
//! ```

use std::sync::Arc;
use std::time::Duration;

use courier_core::cipher::{CipherError, CipherResult, EnvelopeCipher};
use courier_core::content::{Content, DataMessage, DataPayload, EnvelopeMetadata};
use courier_core::envelope::{Envelope, EnvelopeKind};
use courier_core::jobs::{Job, JobChain, JobQueue};
use courier_core::Courier;
use courier_memory_storage::MemoryStorage;
use courier_storage_traits::messages::MessageStorage;
use courier_storage_traits::recipients::RecipientStorage;
use courier_storage_traits::threads::ThreadStorage;
use courier_storage_traits::{DeviceId, ServiceId};

const LOCAL: [u8; 16] = [0xaa; 16];
const PEER: [u8; 16] = [0x01; 16];

/// Treats the payload as plaintext from the fixed peer.
struct TransparentCipher;

impl EnvelopeCipher for TransparentCipher {
    fn decrypt(&self, envelope: &Envelope) -> Result<Option<CipherResult>, CipherError> {
        let body = String::from_utf8(envelope.payload.clone())
            .map_err(|e| CipherError::InvalidMetadata(e.to_string()))?;

        Ok(Some(CipherResult {
            content: Content::Data(DataMessage {
                sent_timestamp_ms: envelope.client_timestamp_ms,
                group: None,
                profile_key: None,
                expires_in_ms: None,
                payload: DataPayload::Text { body },
            }),
            metadata: EnvelopeMetadata {
                source_service_id: ServiceId::from_bytes(PEER),
                source_device: DeviceId::PRIMARY,
                destination_service_id: ServiceId::from_bytes(LOCAL),
                sealed_sender: true,
                group_id: None,
            },
        }))
    }
}

/// Prints jobs instead of running them.
struct PrintingJobQueue;

impl JobQueue for PrintingJobQueue {
    fn add(&self, job: Job) {
        println!("  job enqueued on '{}': {:?}", job.queue(), job);
    }

    fn add_chain(&self, chain: JobChain) {
        for job in chain.jobs() {
            println!("  chained job on '{}': {:?}", job.queue(), job);
        }
    }

    fn drain_queue(&self, _queue: &str, _timeout: Duration) -> bool {
        true
    }

    fn add_listener(&self, _queue_prefix: &str, _listener: Box<dyn Fn(&Job) + Send + Sync>) {}
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("courier_core=debug")
        .init();

    let courier = Courier::new(
        MemoryStorage::new(ServiceId::from_bytes(LOCAL)),
        Arc::new(TransparentCipher),
        Arc::new(PrintingJobQueue),
    );

    for (i, text) in ["hello", "from", "the pipeline"].iter().enumerate() {
        let envelope = Envelope {
            source_service_id: Some(ServiceId::from_bytes(PEER)),
            source_device: DeviceId::PRIMARY,
            destination_service_id: Some(ServiceId::from_bytes(LOCAL)),
            kind: EnvelopeKind::Ciphertext,
            server_timestamp_ms: 1_000 + i as u64,
            client_timestamp_ms: 1_000 + i as u64,
            server_guid: format!("example-{}", i),
            payload: text.as_bytes().to_vec(),
            urgent: false,
        };

        courier
            .process_envelope(&envelope, 1_000 + i as u64)
            .expect("processing should succeed");
    }

    let peer = courier
        .storage()
        .resolve_service_id(&ServiceId::from_bytes(PEER))
        .expect("peer should resolve");
    let thread = courier
        .storage()
        .thread_for_recipient(peer.id)
        .expect("storage should answer")
        .expect("thread should exist");

    println!("\nstored messages:");
    for message in courier
        .storage()
        .messages_in_thread(thread)
        .expect("messages should load")
    {
        println!(
            "  [{}] {}",
            message.sent_timestamp_ms,
            message.body.as_deref().unwrap_or("<no body>")
        );
    }
}
