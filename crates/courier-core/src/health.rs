//! Keep-alive bookkeeping.
//!
//! Detects connections that died without the transport noticing (half-open
//! TCP, NAT timeouts). The driver calls [`KeepAliveTracker::poll`] once per
//! probe interval and either sends a probe or tears the connection down.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

/// Interval between keep-alive probes.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Missed probe intervals tolerated before declaring a stall.
pub const DEFAULT_STALL_MULTIPLIER: u32 = 3;

/// Time allowed for a connect attempt before it is abandoned.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Health monitor configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval between keep-alive probes
    pub keep_alive_interval: Duration,
    /// Stall window as a multiple of `keep_alive_interval`
    pub stall_multiplier: u32,
    /// Connect watchdog timeout
    pub connect_timeout: Duration,
}

impl HealthConfig {
    /// Maximum gap between the latest probe and the latest acknowledgment.
    #[must_use]
    pub fn stall_timeout(&self) -> Duration {
        self.keep_alive_interval * self.stall_multiplier
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            stall_multiplier: DEFAULT_STALL_MULTIPLIER,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// What the driver should do after a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveAction {
    /// Send a keep-alive probe now
    SendProbe,
    /// No acknowledgment within the stall window; tear down
    Stalled {
        /// Gap between the latest probe and the latest acknowledgment
        gap: Duration,
    },
}

/// Keep-alive tracker
///
/// The stall check compares the timestamp of the last *sent* probe against
/// the last acknowledgment instead of the current time. A process that was
/// suspended therefore gets one fresh probe before being judged.
///
/// Generic over `Instant` so tests can drive it with virtual time.
#[derive(Debug, Clone)]
pub struct KeepAliveTracker<I = Instant>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    config: HealthConfig,
    last_probe: Option<I>,
    last_ack: I,
}

impl<I> KeepAliveTracker<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create a tracker that considers `now` the last sign of life.
    pub fn new(config: HealthConfig, now: I) -> Self {
        Self { config, last_probe: None, last_ack: now }
    }

    /// Forget probe history; call when a connection (re)opens.
    pub fn reset(&mut self, now: I) {
        self.last_probe = None;
        self.last_ack = now;
    }

    /// Record a keep-alive acknowledgment.
    pub fn on_ack(&mut self, now: I) {
        if now > self.last_ack {
            self.last_ack = now;
        }
    }

    /// Timestamp of the latest acknowledgment (or reset).
    #[must_use]
    pub fn last_ack(&self) -> I {
        self.last_ack
    }

    /// Decide whether to probe or declare a stall.
    ///
    /// Records `now` as the probe time when returning
    /// [`KeepAliveAction::SendProbe`].
    pub fn poll(&mut self, now: I) -> KeepAliveAction {
        if let Some(probe) = self.last_probe
            && probe > self.last_ack
        {
            let gap = probe - self.last_ack;
            if gap > self.config.stall_timeout() {
                return KeepAliveAction::Stalled { gap };
            }
        }

        self.last_probe = Some(now);
        KeepAliveAction::SendProbe
    }
}
