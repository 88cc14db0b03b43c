//! Property-based tests for frame and payload decoding
//!
//! Decoding must never panic on arbitrary input, and anything the encoder
//! produces must decode back to the same frame.

use courier_proto::{
    Frame, FrameHeader, Opcode, Payload,
    payloads::{
        directory::{
            ContactChangeNotification, ContactEntry, ContactFields, DirectorySnapshot,
            MemberAction, MemberChange,
        },
        message::Envelope,
    },
};
use proptest::prelude::*;

fn arbitrary_opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![
        Just(Opcode::Hello),
        Just(Opcode::HelloReply),
        Just(Opcode::Error),
        Just(Opcode::KeepAlive),
        Just(Opcode::KeepAliveAck),
        Just(Opcode::ContactNotify),
        Just(Opcode::FetchDirectory),
        Just(Opcode::DirectorySnapshot),
        Just(Opcode::Envelope),
        Just(Opcode::Receipt),
    ]
}

fn arbitrary_fields() -> impl Strategy<Value = ContactFields> {
    (
        proptest::option::of("[a-z]{1,8}"),
        proptest::option::of("[a-z0-9]{4}"),
        proptest::option::of(any::<u32>()),
    )
        .prop_map(|(name, avatar_ref, meeting_version)| ContactFields {
            name,
            avatar_ref,
            meeting_version,
            ..Default::default()
        })
}

fn arbitrary_action() -> impl Strategy<Value = MemberAction> {
    prop_oneof![
        Just(MemberAction::Add),
        Just(MemberAction::Update),
        Just(MemberAction::DeleteBySelf),
        Just(MemberAction::DeleteByOther),
    ]
}

fn arbitrary_notification() -> impl Strategy<Value = ContactChangeNotification> {
    (
        any::<u64>(),
        prop::collection::vec(("[a-z]{1,6}", arbitrary_action(), arbitrary_fields()), 0..5),
    )
        .prop_map(|(directory_version, changes)| ContactChangeNotification {
            directory_version,
            changes: changes
                .into_iter()
                .map(|(member_id, action, fields)| MemberChange { member_id, action, fields })
                .collect(),
        })
}

#[test]
fn prop_frame_decode_never_panics() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 0..256))| {
        let _ = Frame::decode(&bytes);
    });
}

#[test]
fn prop_payload_decode_never_panics() {
    proptest!(|(
        opcode in arbitrary_opcode(),
        bytes in prop::collection::vec(any::<u8>(), 0..256)
    )| {
        let _ = Payload::decode(opcode, &bytes);
    });
}

#[test]
fn prop_frame_encode_decode_identity() {
    proptest!(|(
        opcode in arbitrary_opcode(),
        request_id in any::<u32>(),
        payload in prop::collection::vec(any::<u8>(), 0..1024),
    )| {
        let header = FrameHeader::new(opcode).with_request_id(request_id);
        let frame = Frame::new(header, payload);

        let bytes = frame.to_vec().unwrap();
        prop_assert_eq!(bytes.len(), frame.encoded_len());
        prop_assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    });
}

#[test]
fn prop_notification_payload_identity() {
    proptest!(|(notification in arbitrary_notification())| {
        let frame = Payload::ContactNotify(notification.clone()).to_frame().unwrap();
        let decoded = Payload::from_frame(&frame).unwrap();
        prop_assert_eq!(decoded, Payload::ContactNotify(notification));
    });
}

#[test]
fn snapshot_and_envelope_decode_from_wire() {
    let snapshot = DirectorySnapshot {
        version: 12,
        contacts: vec![ContactEntry {
            id: "bob".to_string(),
            fields: ContactFields { name: Some("Bob".to_string()), ..Default::default() },
        }],
    };
    let header = FrameHeader::new(Opcode::DirectorySnapshot).with_request_id(3);
    let frame = Payload::DirectorySnapshot(snapshot.clone()).into_frame(header).unwrap();
    let wire = frame.to_vec().unwrap();

    let decoded = Frame::decode(&wire).unwrap();
    assert_eq!(decoded.header.request_id(), 3);
    assert_eq!(Payload::from_frame(&decoded).unwrap(), Payload::DirectorySnapshot(snapshot));

    let envelope = Envelope {
        message_id: "m1".to_string(),
        conversation_id: "bob".to_string(),
        sender_id: "bob".to_string(),
        timestamp: 1_700_000_000_000,
        ciphertext: vec![1, 2, 3],
    };
    let frame = Payload::Envelope(envelope.clone()).to_frame().unwrap();
    assert_eq!(Payload::from_frame(&frame).unwrap(), Payload::Envelope(envelope));
}
