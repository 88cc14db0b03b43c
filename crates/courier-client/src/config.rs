//! Client configuration.

use std::time::Duration;

use courier_core::{HealthConfig, ReconnectConfig};

/// Interval between directory batch ticks.
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(3);

/// Time allowed for a full directory fetch.
pub const DEFAULT_RESYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// QUIC transport configuration
#[derive(Debug, Clone)]
pub struct QuicConfig {
    /// Server addresses (`host:port`), tried in rotation
    pub servers: Vec<String>,
    /// Name checked against the server certificate
    pub server_name: String,
    /// Credential sent in `Hello`
    pub auth_token: Option<String>,
    /// Idle timeout negotiated with the server
    pub idle_timeout: Duration,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            servers: vec!["127.0.0.1:4433".to_string()],
            server_name: "localhost".to_string(),
            auth_token: None,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Directory sync configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between batch ticks
    pub batch_interval: Duration,
    /// Timeout for a full directory fetch
    pub resync_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { batch_interval: DEFAULT_BATCH_INTERVAL, resync_timeout: DEFAULT_RESYNC_TIMEOUT }
    }
}

/// Everything a [`Session`](crate::Session) needs.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Transport settings
    pub transport: QuicConfig,
    /// Keep-alive and connect watchdog
    pub health: HealthConfig,
    /// Reconnect policy
    pub reconnect: ReconnectConfig,
    /// Directory sync
    pub sync: SyncConfig,
}
