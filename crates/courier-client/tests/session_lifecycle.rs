//! Session behavior over the in-process transport on a paused clock.
//!
//! Covers the connection lifecycle (reconnect, keep-alive stall, connect
//! watchdog, failure states) and routing of inbound frames.

use std::{sync::Arc, time::Duration};

use courier_client::{
    ClientConfig, ConnectOutcome, MemoryPeer, MemoryTransport, PassthroughCodec, Session,
};
use courier_core::{ConnError, ConnectionState, ReconnectConfig, SendStatus};
use courier_proto::{
    Opcode, Payload,
    payloads::{
        directory::{ContactChangeNotification, ContactFields, MemberAction, MemberChange},
        message::{Envelope, Receipt, ReceiptKind},
    },
};
use courier_store::{DirectoryStore, MemoryStorage, MessageStore};
use tokio::time::timeout;

type TestSession = Session<MemoryTransport, MemoryStorage, PassthroughCodec>;

fn config() -> ClientConfig {
    ClientConfig { reconnect: ReconnectConfig::default().without_jitter(), ..Default::default() }
}

/// Start a session; `script` runs against the peer before the first attempt.
fn start(
    config: &ClientConfig,
    script: impl FnOnce(&MemoryPeer),
) -> (TestSession, MemoryPeer, MemoryStorage) {
    let (transport, peer, events) = MemoryTransport::pair("mem");
    script(&peer);

    let store = MemoryStorage::new();
    let session = Session::start(
        config,
        Arc::new(transport),
        events,
        store.clone(),
        Arc::new(PassthroughCodec),
        "me",
    )
    .unwrap();

    (session, peer, store)
}

async fn reach(session: &TestSession, state: ConnectionState) {
    let mut states = session.subscribe_state();
    timeout(Duration::from_secs(600), states.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("never reached {state}, stuck in {}", session.state()))
        .unwrap();
}

async fn idle(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn connects_on_start() {
    let (session, peer, _store) = start(&config(), |_| {});

    reach(&session, ConnectionState::Connected).await;

    assert_eq!(peer.connect_attempts(), 1);
    assert!(peer.is_connected());
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_surfaces_then_retry_connects() {
    let (session, peer, _store) = start(&config(), |peer| {
        peer.script_connect(ConnectOutcome::Fail(ConnError::AuthRejected("401".into())));
    });

    reach(&session, ConnectionState::AuthFailed).await;
    assert_eq!(session.connection().last_error(), Some(ConnError::AuthRejected("401".into())));

    reach(&session, ConnectionState::Connected).await;
    assert_eq!(peer.connect_attempts(), 2);
    assert_eq!(session.connection().last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn unresolvable_host_has_its_own_state() {
    let (session, _peer, _store) = start(&config(), |peer| {
        peer.script_connect(ConnectOutcome::Fail(ConnError::DnsFailure("nx".into())));
    });

    reach(&session, ConnectionState::UnknownHostFailed).await;
}

#[tokio::test(start_paused = true)]
async fn missing_keep_alive_acks_force_reconnect() {
    let (session, peer, _store) = start(&config(), |_| {});
    reach(&session, ConnectionState::Connected).await;

    // Probes go unanswered: stall is declared once the probe/ack gap exceeds
    // three intervals
    idle(200).await;

    assert_eq!(peer.connect_attempts(), 2);
    reach(&session, ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn acknowledged_keep_alives_keep_connection() {
    let (session, mut peer, _store) = start(&config(), |_| {});
    reach(&session, ConnectionState::Connected).await;

    let responder = tokio::spawn(async move {
        while let Some(frame) = peer.recv().await {
            if frame.header.opcode_enum() == Some(Opcode::KeepAlive) {
                peer.deliver(Payload::KeepAliveAck.to_frame().unwrap()).await;
            }
        }
    });

    idle(600).await;

    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.connection().transitions(), 2);
    responder.abort();
}

#[tokio::test(start_paused = true)]
async fn hung_connect_is_cancelled_and_retried() {
    let (session, peer, _store) = start(&config(), |peer| {
        peer.script_connect(ConnectOutcome::Hang);
    });

    idle(15).await;

    reach(&session, ConnectionState::Connected).await;
    assert_eq!(peer.connect_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn server_drop_reconnects_immediately() {
    let (session, peer, _store) = start(&config(), |_| {});
    reach(&session, ConnectionState::Connected).await;

    peer.drop_connection("server restart").await;
    idle(1).await;

    reach(&session, ConnectionState::Connected).await;
    assert_eq!(peer.connect_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_wait_for_wake() {
    let config = ClientConfig {
        reconnect: ReconnectConfig::default().without_jitter().with_max_attempts(2),
        ..Default::default()
    };
    let (session, peer, _store) = start(&config, |peer| {
        for _ in 0..2 {
            peer.script_connect(ConnectOutcome::Fail(ConnError::IoFailure("refused".into())));
        }
    });

    idle(120).await;
    assert_eq!(peer.connect_attempts(), 2);
    assert_eq!(session.state(), ConnectionState::Failed);

    session.wake();

    reach(&session, ConnectionState::Connected).await;
    assert_eq!(peer.connect_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn inbound_frames_reach_their_owners() {
    let (session, peer, store) = start(&config(), |_| {});
    reach(&session, ConnectionState::Connected).await;

    let envelope = Envelope {
        message_id: "m1".into(),
        conversation_id: "bob".into(),
        sender_id: "bob".into(),
        timestamp: 10,
        ciphertext: b"hi".to_vec(),
    };
    peer.deliver(Payload::Envelope(envelope.clone()).to_frame().unwrap()).await;
    peer.deliver(Payload::Envelope(envelope).to_frame().unwrap()).await;

    let notification = ContactChangeNotification {
        directory_version: 1,
        changes: vec![MemberChange {
            member_id: "bob".into(),
            action: MemberAction::Add,
            fields: ContactFields { name: Some("Bob".into()), ..Default::default() },
        }],
    };
    peer.deliver(Payload::ContactNotify(notification).to_frame().unwrap()).await;

    idle(4).await;

    assert_eq!(store.messages_in("bob").unwrap().len(), 1);
    assert_eq!(store.directory_version().unwrap(), 1);
    assert_eq!(session.directory_version(), 1);
    assert!(store.load_contact("bob").unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn sent_message_is_marked_delivered_by_receipt() {
    let (session, mut peer, store) = start(&config(), |_| {});
    reach(&session, ConnectionState::Connected).await;

    let sent = session.router().send_text("bob", "hello", 1_000).await.unwrap();
    assert_eq!(sent.send_status, SendStatus::Sent);

    let frame = peer.recv().await.unwrap();
    let Payload::Envelope(envelope) = Payload::from_frame(&frame).unwrap() else {
        panic!("expected envelope");
    };
    assert_eq!(envelope.message_id, sent.id);
    assert_eq!(envelope.ciphertext, b"hello");

    let receipt = Receipt { message_id: sent.id.clone(), kind: ReceiptKind::Delivered };
    peer.deliver(Payload::Receipt(receipt).to_frame().unwrap()).await;
    idle(1).await;

    let stored = store.load_message(&sent.id).unwrap().unwrap();
    assert_eq!(stored.send_status, SendStatus::Delivered);
}

#[tokio::test(start_paused = true)]
async fn server_keep_alive_is_answered() {
    let (session, mut peer, _store) = start(&config(), |_| {});
    reach(&session, ConnectionState::Connected).await;

    peer.deliver(Payload::KeepAlive.to_frame().unwrap()).await;

    let reply = timeout(Duration::from_secs(5), peer.recv()).await.unwrap().unwrap();
    assert_eq!(reply.header.opcode_enum(), Some(Opcode::KeepAliveAck));
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_connection() {
    let (session, peer, _store) = start(&config(), |_| {});
    reach(&session, ConnectionState::Connected).await;
    let connection = session.connection().clone();

    session.shutdown().await;

    assert!(!peer.is_connected());
    assert_eq!(connection.current(), ConnectionState::Disconnected);

    idle(60).await;
    assert_eq!(peer.connect_attempts(), 1);
}
