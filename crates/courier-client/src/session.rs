//! Session wiring.
//!
//! A [`Session`] owns everything attached to one account's connection: the
//! state handle, health monitor, reconnector, directory sync engine and
//! message router. A single dispatcher task consumes the transport's event
//! stream and routes each event to its owner.

use std::sync::Arc;

use courier_core::{ConnectionEvent, ConnectionState};
use courier_proto::{Frame, Payload};
use courier_store::{DirectoryStore, MessageStore};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    codec::Codec,
    config::ClientConfig,
    connection::ConnectionHandle,
    error::SyncError,
    fetcher::TransportFetcher,
    health::HealthMonitor,
    reconnect::Reconnector,
    router::MessageRouter,
    sync::{DirectorySyncEngine, SyncIntake},
    transport::{Transport, TransportEvent},
};

/// Pending envelopes retried each time a connection opens.
pub const PENDING_RETRY_LIMIT: usize = 100;

/// Running client session.
pub struct Session<T, S, C> {
    connection: ConnectionHandle,
    transport: Arc<T>,
    health: Arc<HealthMonitor>,
    reconnector: Reconnector,
    engine: Option<DirectorySyncEngine>,
    router: MessageRouter<S, C, T>,
    dispatcher: JoinHandle<()>,
}

impl<T, S, C> Session<T, S, C>
where
    T: Transport,
    S: DirectoryStore + MessageStore,
    C: Codec,
{
    /// Wire up a session and start connecting.
    ///
    /// `events` must be the event stream created together with `transport`.
    ///
    /// # Errors
    ///
    /// - `SyncError::Storage` if the directory version cannot be read
    pub fn start(
        config: &ClientConfig,
        transport: Arc<T>,
        events: mpsc::Receiver<TransportEvent>,
        store: S,
        codec: Arc<C>,
        local_id: impl Into<String>,
    ) -> Result<Self, SyncError> {
        let connection = ConnectionHandle::new();
        let fetcher = Arc::new(TransportFetcher::new(
            Arc::clone(&transport),
            config.sync.resync_timeout,
        ));
        let engine =
            DirectorySyncEngine::start(config.sync.clone(), store.clone(), Arc::clone(&fetcher))?;
        let router = MessageRouter::new(store, codec, Arc::clone(&transport), local_id);

        let health = Arc::new(HealthMonitor::new(config.health.clone()));
        health.monitor(Arc::clone(&transport), connection.clone());

        let dispatcher = Dispatcher {
            connection: connection.clone(),
            transport: Arc::clone(&transport),
            health: Arc::clone(&health),
            fetcher,
            intake: engine.intake(),
            router: router.clone(),
        };
        let dispatcher = tokio::spawn(dispatcher.run(events));

        let reconnect = config.reconnect.clone();
        let reconnector = Reconnector::spawn(reconnect, Arc::clone(&transport), connection.clone());

        tracing::info!(transport = transport.name(), "session started");

        Ok(Self {
            connection,
            transport,
            health,
            reconnector,
            engine: Some(engine),
            router,
            dispatcher,
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.current()
    }

    /// Observe connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Shared connection state handle.
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Message router for sending and for local queries.
    pub fn router(&self) -> &MessageRouter<S, C, T> {
        &self.router
    }

    /// Underlying transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Last applied directory version.
    pub fn directory_version(&self) -> u64 {
        self.engine.as_ref().map_or(0, DirectorySyncEngine::version)
    }

    /// Observe directory version changes.
    pub fn subscribe_directory_version(&self) -> Option<watch::Receiver<u64>> {
        self.engine.as_ref().map(DirectorySyncEngine::subscribe_version)
    }

    /// Fetch the full directory now.
    ///
    /// # Errors
    ///
    /// See [`DirectorySyncEngine::resync_now`].
    pub async fn resync_directory(&self) -> Result<u64, SyncError> {
        match &self.engine {
            Some(engine) => engine.resync_now().await,
            None => Err(SyncError::ShutDown),
        }
    }

    /// Reconnect now, skipping any backoff (network change, app foreground).
    pub fn wake(&self) {
        self.reconnector.wake();
    }

    /// Stop the session.
    ///
    /// Stops reconnecting and monitoring, lets the directory worker finish its
    /// in-flight tick, then closes the transport.
    pub async fn shutdown(mut self) {
        self.reconnector.stop();
        self.health.stop_monitoring();

        if let Some(engine) = self.engine.take() {
            engine.shutdown().await;
        }

        self.transport.close("session shutdown").await;
        self.dispatcher.abort();

        let teardown = match self.connection.current() {
            ConnectionState::Connected => Some(ConnectionEvent::Closed),
            ConnectionState::Connecting => Some(ConnectionEvent::Cancelled),
            _ => None,
        };
        if let Some(event) = teardown {
            let _ = self.connection.apply(event);
        }

        tracing::info!(transport = self.transport.name(), "session stopped");
    }
}

impl<T, S, C> Drop for Session<T, S, C> {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

struct Dispatcher<T, S, C> {
    connection: ConnectionHandle,
    transport: Arc<T>,
    health: Arc<HealthMonitor>,
    fetcher: Arc<TransportFetcher<T>>,
    intake: SyncIntake,
    router: MessageRouter<S, C, T>,
}

impl<T, S, C> Dispatcher<T, S, C>
where
    T: Transport,
    S: MessageStore,
    C: Codec,
{
    async fn run(self, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        tracing::debug!("transport event stream ended");
    }

    async fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                let _ = self.connection.apply(ConnectionEvent::Opened);
                if let Err(e) = self.router.retry_pending(PENDING_RETRY_LIMIT) {
                    tracing::warn!(error = %e, "pending retry failed");
                }
            },
            TransportEvent::Error(err) => {
                tracing::debug!(error = %err, "transport error");
                let _ = self.connection.apply(ConnectionEvent::Failed(err));
            },
            TransportEvent::Closed { reason } => {
                tracing::info!(%reason, "connection closed");
                let _ = self.connection.apply(ConnectionEvent::Closed);
            },
            TransportEvent::Frame(frame) => self.handle_frame(&frame).await,
        }
    }

    async fn handle_frame(&self, frame: &Frame) {
        let payload = match Payload::from_frame(frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(opcode = frame.header.opcode(), error = %e, "undecodable frame");
                return;
            },
        };

        match payload {
            Payload::KeepAliveAck => self.health.on_keep_alive_response(),
            Payload::KeepAlive => {
                let ack = match Payload::KeepAliveAck.to_frame() {
                    Ok(ack) => ack,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to build keep-alive ack");
                        return;
                    },
                };
                if let Err(e) = self.transport.send(ack).await {
                    tracing::debug!(error = %e, "keep-alive ack not sent");
                }
            },
            Payload::ContactNotify(notification) => {
                if let Err(e) = self.intake.submit(notification) {
                    tracing::warn!(error = %e, "directory notification dropped");
                }
            },
            Payload::DirectorySnapshot(snapshot) => {
                self.fetcher.handle_snapshot(frame.header.request_id(), snapshot);
            },
            Payload::Envelope(envelope) => {
                let message_id = envelope.message_id.clone();
                if let Err(e) = self.router.handle_envelope(envelope) {
                    tracing::warn!(%message_id, error = %e, "inbound envelope rejected");
                }
            },
            Payload::Receipt(receipt) => {
                if let Err(e) = self.router.handle_receipt(&receipt) {
                    tracing::warn!(
                        message_id = %receipt.message_id,
                        error = %e,
                        "receipt not applied"
                    );
                }
            },
            Payload::Error(err) => {
                tracing::warn!(code = err.code, message = %err.message, "server error");
            },
            Payload::Hello(_) | Payload::HelloReply(_) | Payload::FetchDirectory => {
                tracing::debug!(opcode = frame.header.opcode(), "unexpected frame");
            },
        }
    }
}
