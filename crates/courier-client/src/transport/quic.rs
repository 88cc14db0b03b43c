//! QUIC transport.
//!
//! One persistent bidirectional stream per connection carries every frame in
//! both directions. The first exchange on it is `Hello` / `HelloReply`; the
//! server answers a rejected `Hello` with an `Error` frame whose code decides
//! which [`ConnError`] the attempt fails with.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::BytesMut;
use courier_core::ConnError;
use courier_proto::{
    ALPN_PROTOCOL, ErrorPayload, Frame, FrameHeader, Payload, payloads::session::Hello,
};
use quinn::{
    ClientConfig, Connection, ConnectionError, Endpoint, RecvStream, SendStream, VarInt, WriteError,
};
use tokio::sync::{Mutex, Notify, mpsc};

use super::{EVENT_CHANNEL_CAPACITY, Transport, TransportEvent};
use crate::config::QuicConfig;

/// Live connection state.
struct Link {
    connection: Connection,
    session_id: u64,
}

/// QUIC client transport with host rotation.
pub struct QuicTransport {
    config: QuicConfig,
    endpoint: Endpoint,
    events: mpsc::Sender<TransportEvent>,
    link: Mutex<Option<Link>>,
    stream: Arc<Mutex<Option<SendStream>>>,
    connecting: Mutex<()>,
    connected: Arc<AtomicBool>,
    /// Bumped per established connection; stale read loops compare against it
    generation: Arc<AtomicU64>,
    next_server: AtomicUsize,
    closing: Notify,
}

impl QuicTransport {
    /// Create a transport and its event stream.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `ConnError::IoFailure` if the local endpoint cannot be bound or no
    ///   server address is configured
    pub fn new(
        config: QuicConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), ConnError> {
        if config.servers.is_empty() {
            return Err(ConnError::IoFailure("no server address configured".to_string()));
        }

        let mut endpoint = Endpoint::client(SocketAddr::from(([0, 0, 0, 0], 0)))
            .map_err(|e| ConnError::IoFailure(format!("endpoint creation failed: {e}")))?;
        endpoint.set_default_client_config(insecure_client_config(config.idle_timeout)?);

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let transport = Self {
            config,
            endpoint,
            events: events_tx,
            link: Mutex::new(None),
            stream: Arc::new(Mutex::new(None)),
            connecting: Mutex::new(()),
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            next_server: AtomicUsize::new(0),
            closing: Notify::new(),
        };

        Ok((transport, events_rx))
    }

    /// Session id assigned by the server for the live connection.
    pub async fn session_id(&self) -> Option<u64> {
        self.link.lock().await.as_ref().map(|link| link.session_id)
    }

    fn current_server(&self) -> &str {
        let index = self.next_server.load(Ordering::Relaxed) % self.config.servers.len();
        &self.config.servers[index]
    }

    /// Move to the next configured server for the following attempt.
    fn rotate_server(&self) {
        if self.config.servers.len() > 1 {
            let next = self.next_server.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(
                server = %self.config.servers[next % self.config.servers.len()],
                "switching server"
            );
        }
    }

    async fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event).await;
    }

    /// Resolve, handshake and exchange `Hello`.
    async fn establish(&self) -> Result<(Connection, SendStream, RecvStream, u64), ConnError> {
        let server = self.current_server();

        let addr = tokio::net::lookup_host(server)
            .await
            .map_err(|e| ConnError::DnsFailure(format!("{server}: {e}")))?
            .next()
            .ok_or_else(|| ConnError::DnsFailure(format!("{server}: no addresses")))?;

        let connection = self
            .endpoint
            .connect(addr, &self.config.server_name)
            .map_err(|e| ConnError::Handshake(e.to_string()))?
            .await
            .map_err(|e| ConnError::Handshake(e.to_string()))?;

        let (mut send, mut recv) = connection
            .open_bi()
            .await
            .map_err(|e| ConnError::IoFailure(format!("open stream failed: {e}")))?;

        let hello = Payload::Hello(Hello {
            version: FrameHeader::VERSION,
            auth_token: self.config.auth_token.clone(),
        })
        .to_frame()?;
        write_frame(&mut send, &hello).await?;

        let reply = read_frame(&mut recv).await?;
        match Payload::from_frame(&reply)? {
            Payload::HelloReply(reply) => Ok((connection, send, recv, reply.session_id)),
            Payload::Error(error) => {
                connection.close(VarInt::from_u32(0), b"handshake rejected");
                Err(rejection(error))
            },
            other => {
                connection.close(VarInt::from_u32(0), b"unexpected handshake reply");
                let opcode = other.opcode();
                Err(ConnError::Protocol(format!("unexpected {opcode:?} during handshake")))
            },
        }
    }
}

#[async_trait]
impl Transport for QuicTransport {
    async fn connect(&self) -> Result<(), ConnError> {
        let _attempt = self.connecting.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let server = self.current_server().to_string();
        tracing::debug!(%server, "connecting");

        let result = tokio::select! {
            result = self.establish() => result,
            () = self.closing.notified() => Err(ConnError::Closed),
        };

        let (connection, send, recv, session_id) = match result {
            Ok(established) => established,
            Err(err) => {
                tracing::debug!(%server, error = %err, "connect attempt failed");
                self.rotate_server();
                self.emit(TransportEvent::Error(err.clone())).await;
                return Err(err);
            },
        };

        *self.link.lock().await = Some(Link { connection, session_id });
        // Bumped under the stream lock so a finishing stale read loop cannot
        // take the new stream
        let generation = {
            let mut stream = self.stream.lock().await;
            *stream = Some(send);
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.connected.store(true, Ordering::SeqCst);

        tracing::info!(%server, session_id, "connected");
        self.emit(TransportEvent::Opened).await;

        tokio::spawn(read_loop(recv, generation, ReadLoopShared {
            events: self.events.clone(),
            connected: Arc::clone(&self.connected),
            generation: Arc::clone(&self.generation),
            stream: Arc::clone(&self.stream),
        }));

        Ok(())
    }

    async fn send(&self, frame: Frame) -> Result<(), ConnError> {
        if !self.is_connected() {
            return Err(ConnError::Closed);
        }

        let bytes = frame.to_vec()?;

        let mut stream = self.stream.lock().await;
        // close() may have run while we queued for the stream
        let Some(send) = stream.as_mut().filter(|_| self.is_connected()) else {
            return Err(ConnError::Closed);
        };

        tokio::select! {
            result = send.write_all(&bytes) => result.map_err(write_error),
            () = self.closing.notified() => Err(ConnError::Closed),
        }
    }

    async fn close(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);

        if let Some(link) = self.link.lock().await.take() {
            link.connection.close(VarInt::from_u32(0), reason.as_bytes());
            tracing::debug!(reason, session_id = link.session_id, "connection closed locally");
        }

        self.closing.notify_waiters();
        self.stream.lock().await.take();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "quic"
    }
}

impl Drop for QuicTransport {
    fn drop(&mut self) {
        self.endpoint.close(VarInt::from_u32(0), b"transport dropped");
    }
}

/// Transport state the read loop needs after the transport call returns.
struct ReadLoopShared {
    events: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    stream: Arc<Mutex<Option<SendStream>>>,
}

/// Forward inbound frames until the stream ends, then report `Closed`.
///
/// A loop whose connection was already replaced exits silently.
async fn read_loop(mut recv: RecvStream, generation: u64, shared: ReadLoopShared) {
    let reason = loop {
        match read_frame(&mut recv).await {
            Ok(frame) => {
                if shared.events.send(TransportEvent::Frame(frame)).await.is_err() {
                    break "event receiver dropped".to_string();
                }
            },
            Err(err) => break err.to_string(),
        }
    };

    let mut stream = shared.stream.lock().await;
    if shared.generation.load(Ordering::SeqCst) != generation {
        tracing::debug!(generation, "stale read loop finished");
        return;
    }
    shared.connected.store(false, Ordering::SeqCst);
    stream.take();
    drop(stream);

    tracing::debug!(%reason, "read loop finished");
    let _ = shared.events.send(TransportEvent::Closed { reason }).await;
}

/// Map a handshake `Error` frame to the matching failure kind.
fn rejection(error: ErrorPayload) -> ConnError {
    match error.code {
        ErrorPayload::AUTH_REJECTED => ConnError::AuthRejected(error.message),
        ErrorPayload::ACCOUNT_INACTIVE => ConnError::AccountInactive(error.message),
        ErrorPayload::UNSUPPORTED_VERSION | ErrorPayload::INVALID_PAYLOAD => {
            ConnError::Protocol(error.message)
        },
        _ => ConnError::IoFailure(format!("server error {}: {}", error.code, error.message)),
    }
}

async fn read_frame(recv: &mut RecvStream) -> Result<Frame, ConnError> {
    let mut buf = BytesMut::zeroed(FrameHeader::SIZE);
    recv.read_exact(&mut buf[..])
        .await
        .map_err(|e| ConnError::IoFailure(format!("header read failed: {e}")))?;

    let payload_size = FrameHeader::from_bytes(&buf)?.payload_size() as usize;

    if payload_size > 0 {
        buf.resize(FrameHeader::SIZE + payload_size, 0);
        recv.read_exact(&mut buf[FrameHeader::SIZE..])
            .await
            .map_err(|e| ConnError::IoFailure(format!("payload read failed: {e}")))?;
    }

    Ok(Frame::decode(&buf)?)
}

async fn write_frame(send: &mut SendStream, frame: &Frame) -> Result<(), ConnError> {
    let bytes = frame.to_vec()?;
    send.write_all(&bytes).await.map_err(write_error)
}

/// Writes on a connection we closed ourselves report `Closed`.
fn write_error(err: WriteError) -> ConnError {
    match err {
        WriteError::ClosedStream | WriteError::ConnectionLost(ConnectionError::LocallyClosed) => {
            ConnError::Closed
        },
        other => ConnError::IoFailure(format!("write failed: {other}")),
    }
}

/// Client config that accepts any certificate.
///
/// WARNING: Development only. Production should verify certificates.
fn insecure_client_config(idle_timeout: Duration) -> Result<ClientConfig, ConnError> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
        .with_no_client_auth();

    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| ConnError::Handshake(format!("invalid TLS config: {e}")))?;
    let mut config = ClientConfig::new(Arc::new(quic_crypto));

    let idle = idle_timeout
        .try_into()
        .map_err(|e| ConnError::IoFailure(format!("invalid idle timeout: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(idle));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate (insecure, for
/// development).
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
