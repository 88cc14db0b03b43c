//! Connection transports.
//!
//! A transport owns at most one live connection to the server. Lifecycle
//! changes and inbound frames are pushed on the event channel returned by the
//! transport's constructor; the session dispatcher is the only consumer.

mod memory;
mod quic;

use async_trait::async_trait;
use courier_core::ConnError;
use courier_proto::Frame;
pub use memory::{ConnectOutcome, MemoryPeer, MemoryTransport};
pub use quic::QuicTransport;

/// Capacity of a transport's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed; frames may flow
    Opened,
    /// Inbound frame
    Frame(Frame),
    /// A connect attempt failed
    Error(ConnError),
    /// The live connection ended
    Closed {
        /// Why it ended
        reason: String,
    },
}

/// Bidirectional connection to the server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection. No-op returning `Ok` when already connected.
    ///
    /// Emits `Opened` on success and `Error` on failure.
    async fn connect(&self) -> Result<(), ConnError>;

    /// Send one frame on the live connection.
    ///
    /// # Errors
    ///
    /// - `ConnError::Closed` if there is no live connection or it is closed
    ///   while the send is pending
    async fn send(&self, frame: Frame) -> Result<(), ConnError>;

    /// Close the live connection and unblock pending `connect`/`send` calls
    /// with `ConnError::Closed`.
    async fn close(&self, reason: &str);

    /// Whether a live connection exists.
    fn is_connected(&self) -> bool;

    /// Name for logs.
    fn name(&self) -> &str;
}
