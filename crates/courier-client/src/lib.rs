//! Client runtime
//!
//! tokio drivers around the sans-IO logic in [`courier_core`]. Owns the
//! persistent server connection, keeps it healthy, and feeds directory
//! notifications and message envelopes into storage.
//!
//! # Architecture
//!
//! ```text
//! Transport ──events──> Dispatcher ──> ConnectionHandle <── HealthMonitor
//!                           │                 ^                Reconnector
//!                           ├──> DirectorySyncEngine (worker task)
//!                           └──> MessageRouter ──> MessageStore
//! ```
//!
//! # Components
//!
//! - [`Transport`]: connection seam, with [`QuicTransport`] and the
//!   in-process [`MemoryTransport`]
//! - [`ConnectionHandle`]: shared [`courier_core::ConnectionStateMachine`]
//!   published on a watch channel
//! - [`HealthMonitor`]: keep-alive probes and the connect watchdog
//! - [`Reconnector`]: backoff-driven reconnect loop
//! - [`DirectorySyncEngine`]: batched, gap-aware directory sync
//! - [`MessageRouter`]: deduplicating inbound delivery and outbound sends
//! - [`Session`]: wires all of the above to one transport

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod config;
mod connection;
mod error;
mod fetcher;
mod health;
mod reconnect;
mod router;
mod session;
mod sync;
pub mod transport;

pub use codec::{Codec, CodecError, Decrypted, PassthroughCodec};
pub use config::{ClientConfig, QuicConfig, SyncConfig};
pub use connection::ConnectionHandle;
pub use error::{MessageError, SyncError};
pub use fetcher::{DirectoryFetcher, TransportFetcher};
pub use health::{HealthMonitor, MonitorStatus};
pub use reconnect::Reconnector;
pub use router::{Inbound, MessageRouter, RetryReport};
pub use session::{PENDING_RETRY_LIMIT, Session};
pub use sync::{DirectorySyncEngine, SyncIntake, TickReport};
pub use transport::{
    ConnectOutcome, MemoryPeer, MemoryTransport, QuicTransport, Transport, TransportEvent,
};
