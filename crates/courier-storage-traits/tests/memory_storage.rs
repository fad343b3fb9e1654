//! Exercises the combined provider contract through the memory backend.

use courier_memory_storage::MemoryStorage;
use courier_storage_traits::groups::GroupStorage;
use courier_storage_traits::groups::types::{Group, GroupVersion};
use courier_storage_traits::messages::MessageStorage;
use courier_storage_traits::messages::types::{MessageKind, NewMessage};
use courier_storage_traits::recipients::RecipientStorage;
use courier_storage_traits::threads::ThreadStorage;
use courier_storage_traits::{
    Backend, CourierStorageProvider, DeviceId, GroupId, RecipientId, Secret, ServiceId,
};

fn provider() -> MemoryStorage {
    MemoryStorage::new(ServiceId::from_bytes([0xaa; 16]))
}

// The memory backend satisfies the combined provider bound
fn assert_provider<T: CourierStorageProvider>(_: &T) {}

#[test]
fn backend_reports_memory() {
    let storage = provider();
    assert_provider(&storage);
    assert_eq!(storage.backend(), Backend::Memory);
}

#[test]
fn transactionally_runs_closure() {
    let storage = provider();
    let value = storage.transactionally(|| Ok(41 + 1)).unwrap();
    assert_eq!(value, 42);
}

#[test]
fn full_message_flow_through_provider() {
    let storage = provider();

    let sender = storage
        .resolve_service_id(&ServiceId::from_bytes([1u8; 16]))
        .expect("resolution should create the recipient");
    let thread = storage.get_or_create_thread(sender.id).unwrap();

    let id = storage
        .insert_message(NewMessage {
            thread,
            sender: sender.id,
            sender_device: DeviceId::PRIMARY,
            sent_timestamp_ms: 1000,
            server_timestamp_ms: 1001,
            received_timestamp_ms: 1002,
            kind: MessageKind::Text,
            body: Some("through the provider".to_string()),
            attachment_count: 0,
            expires_in_ms: None,
            outgoing: false,
        })
        .unwrap();

    let found = storage
        .find_message_by_sent_timestamp(sender.id, 1000)
        .unwrap()
        .expect("message should be found");
    assert_eq!(found.id, id);
    assert_eq!(found.thread, thread);
}

#[test]
fn group_membership_queries() {
    let storage = provider();

    let member = RecipientId::new(10);
    let group = Group {
        id: GroupId::from_slice(&[1, 2, 3]),
        version: GroupVersion::V2,
        master_key: Some(Secret::new([0u8; 32])),
        revision: 1,
        active: true,
        announcement_only: false,
        members: vec![member],
        admins: vec![member],
        recipient: RecipientId::new(20),
        distribution_id: None,
    };

    assert!(storage.is_unknown_group(&group.id).unwrap());
    storage.save_group(group.clone()).unwrap();

    assert!(!storage.is_unknown_group(&group.id).unwrap());
    assert!(storage.is_active(&group.id).unwrap());
    assert!(storage.is_current_member(&group.id, member).unwrap());
    assert_eq!(
        storage
            .find_group_by_recipient(RecipientId::new(20))
            .unwrap()
            .map(|g| g.id),
        Some(group.id)
    );
}
