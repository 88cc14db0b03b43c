//! In-process transport for tests and simulation.
//!
//! [`MemoryTransport`] is the client half; [`MemoryPeer`] plays the server:
//! it scripts connect outcomes, injects inbound frames and drops the
//! connection.

#![allow(clippy::disallowed_types, reason = "Locks are never held across an await")]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use courier_core::ConnError;
use courier_proto::Frame;
use tokio::sync::{Notify, mpsc};

use super::{EVENT_CHANNEL_CAPACITY, Transport, TransportEvent};

/// Scripted result of the next connect attempt.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// Handshake succeeds
    Succeed,
    /// Attempt fails with the given error
    Fail(ConnError),
    /// Attempt never completes until the transport is closed
    Hang,
}

struct Shared {
    events: mpsc::Sender<TransportEvent>,
    outcomes: Mutex<VecDeque<ConnectOutcome>>,
    connected: AtomicBool,
    connect_attempts: AtomicUsize,
    closing: Notify,
}

impl Shared {
    async fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event).await;
    }
}

/// Client half of an in-process connection.
pub struct MemoryTransport {
    name: String,
    shared: Arc<Shared>,
    sent: mpsc::UnboundedSender<Frame>,
}

/// Server half of an in-process connection.
pub struct MemoryPeer {
    shared: Arc<Shared>,
    sent: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryTransport {
    /// Create a connected pair plus the transport's event stream.
    ///
    /// Connect attempts succeed unless scripted otherwise.
    pub fn pair(
        name: impl Into<String>,
    ) -> (Self, MemoryPeer, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            events: events_tx,
            outcomes: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(false),
            connect_attempts: AtomicUsize::new(0),
            closing: Notify::new(),
        });

        let transport = Self { name: name.into(), shared: Arc::clone(&shared), sent: sent_tx };
        let peer = MemoryPeer { shared, sent: sent_rx };

        (transport, peer, events_rx)
    }

    fn next_outcome(&self) -> ConnectOutcome {
        self.shared
            .outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or(ConnectOutcome::Succeed)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(), ConnError> {
        if self.is_connected() {
            return Ok(());
        }

        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);

        match self.next_outcome() {
            ConnectOutcome::Succeed => {
                self.shared.connected.store(true, Ordering::SeqCst);
                self.shared.emit(TransportEvent::Opened).await;
                Ok(())
            },
            ConnectOutcome::Fail(err) => {
                self.shared.emit(TransportEvent::Error(err.clone())).await;
                Err(err)
            },
            ConnectOutcome::Hang => {
                self.shared.closing.notified().await;
                self.shared.emit(TransportEvent::Error(ConnError::Closed)).await;
                Err(ConnError::Closed)
            },
        }
    }

    async fn send(&self, frame: Frame) -> Result<(), ConnError> {
        if !self.is_connected() {
            return Err(ConnError::Closed);
        }
        self.sent.send(frame).map_err(|_| ConnError::Closed)
    }

    async fn close(&self, reason: &str) {
        let was_connected = self.shared.connected.swap(false, Ordering::SeqCst);
        self.shared.closing.notify_waiters();

        if was_connected {
            self.shared.emit(TransportEvent::Closed { reason: reason.to_string() }).await;
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl MemoryPeer {
    /// Queue the outcome of a future connect attempt.
    pub fn script_connect(&self, outcome: ConnectOutcome) {
        self.shared
            .outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(outcome);
    }

    /// Deliver a frame to the client.
    pub async fn deliver(&self, frame: Frame) {
        self.shared.emit(TransportEvent::Frame(frame)).await;
    }

    /// Drop the connection from the server side.
    pub async fn drop_connection(&self, reason: &str) {
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.shared.emit(TransportEvent::Closed { reason: reason.to_string() }).await;
        }
    }

    /// Next frame the client sent.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.sent.recv().await
    }

    /// Next frame the client sent, if one is queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.sent.try_recv().ok()
    }

    /// Number of connect attempts so far.
    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Whether the client side is connected.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}
