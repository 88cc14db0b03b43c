//! Keep-alive probing and the connect watchdog.
//!
//! The monitor runs two tasks per transport:
//!
//! - keep-alive: while `Connected`, polls a [`KeepAliveTracker`] once per
//!   probe interval, sends `KeepAlive` frames and tears the connection down on
//!   a stall.
//! - watchdog: closes an attempt that stays in `Connecting` longer than the
//!   connect timeout.

#![allow(clippy::disallowed_types, reason = "Tracker lock is never held across an await")]

use std::sync::{Arc, Mutex, PoisonError};

use courier_core::{
    ConnectionEvent, ConnectionState, HealthConfig, KeepAliveAction, KeepAliveTracker,
};
use courier_proto::Payload;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{connection::ConnectionHandle, transport::Transport};

/// Outcome of [`HealthMonitor::monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    /// Tasks spawned
    Started,
    /// Already monitoring; nothing changed
    AlreadyMonitoring,
}

struct MonitorTasks {
    keep_alive: JoinHandle<()>,
    watchdog: JoinHandle<()>,
}

impl MonitorTasks {
    fn abort(&self) {
        self.keep_alive.abort();
        self.watchdog.abort();
    }

    fn is_finished(&self) -> bool {
        self.keep_alive.is_finished() && self.watchdog.is_finished()
    }
}

/// Health monitor for one transport.
pub struct HealthMonitor {
    config: HealthConfig,
    tracker: Arc<Mutex<KeepAliveTracker<Instant>>>,
    tasks: Mutex<Option<MonitorTasks>>,
}

impl HealthMonitor {
    /// Create an idle monitor.
    pub fn new(config: HealthConfig) -> Self {
        let tracker = KeepAliveTracker::new(config.clone(), Instant::now());
        Self { config, tracker: Arc::new(Mutex::new(tracker)), tasks: Mutex::new(None) }
    }

    /// Start probing `transport` and watching its connect attempts.
    ///
    /// Calling this again without [`Self::stop_monitoring`] is rejected with
    /// [`MonitorStatus::AlreadyMonitoring`].
    pub fn monitor<T: Transport>(
        &self,
        transport: Arc<T>,
        connection: ConnectionHandle,
    ) -> MonitorStatus {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        if tasks.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::warn!(transport = transport.name(), "already monitoring transport");
            return MonitorStatus::AlreadyMonitoring;
        }

        let keep_alive = tokio::spawn(keep_alive_loop(
            self.config.clone(),
            Arc::clone(&self.tracker),
            Arc::clone(&transport),
            connection.clone(),
        ));
        let watchdog = tokio::spawn(watchdog_loop(self.config.clone(), transport, connection));

        *tasks = Some(MonitorTasks { keep_alive, watchdog });
        MonitorStatus::Started
    }

    /// Stop both tasks. No-op if not monitoring.
    pub fn stop_monitoring(&self) {
        if let Some(tasks) = self.tasks.lock().unwrap_or_else(PoisonError::into_inner).take() {
            tasks.abort();
            tracing::debug!("health monitoring stopped");
        }
    }

    /// Record a keep-alive acknowledgment; resets the stall window.
    pub fn on_keep_alive_response(&self) {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner).on_ack(Instant::now());
    }

    /// Whether monitoring tasks are running.
    pub fn is_monitoring(&self) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

/// Wait until the state satisfies `f`. `false` if the handle is gone.
async fn wait_until(
    states: &mut watch::Receiver<ConnectionState>,
    f: impl FnMut(&ConnectionState) -> bool,
) -> bool {
    states.wait_for(f).await.is_ok()
}

async fn keep_alive_loop<T: Transport>(
    config: HealthConfig,
    tracker: Arc<Mutex<KeepAliveTracker<Instant>>>,
    transport: Arc<T>,
    connection: ConnectionHandle,
) {
    let mut states = connection.subscribe();
    let interval = config.keep_alive_interval;

    loop {
        if !wait_until(&mut states, |s| *s == ConnectionState::Connected).await {
            return;
        }
        tracker.lock().unwrap_or_else(PoisonError::into_inner).reset(Instant::now());

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                changed = states.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if *states.borrow_and_update() != ConnectionState::Connected {
                        break;
                    }
                    continue;
                },
            }

            let action =
                tracker.lock().unwrap_or_else(PoisonError::into_inner).poll(Instant::now());

            match action {
                KeepAliveAction::SendProbe => {
                    let frame = match Payload::KeepAlive.to_frame() {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to build keep-alive");
                            continue;
                        },
                    };
                    if let Err(e) = transport.send(frame).await {
                        tracing::debug!(error = %e, "keep-alive probe not sent");
                    }
                },
                KeepAliveAction::Stalled { gap } => {
                    tracing::warn!(?gap, transport = transport.name(), "connection stalled");
                    transport.close("keep-alive timeout").await;
                    let _ = connection.apply(ConnectionEvent::Stalled);
                    break;
                },
            }
        }
    }
}

async fn watchdog_loop<T: Transport>(
    config: HealthConfig,
    transport: Arc<T>,
    connection: ConnectionHandle,
) {
    let mut states = connection.subscribe();

    loop {
        if !wait_until(&mut states, |s| *s == ConnectionState::Connecting).await {
            return;
        }

        tokio::select! {
            () = tokio::time::sleep(config.connect_timeout) => {
                if connection.current() == ConnectionState::Connecting {
                    tracing::warn!(
                        timeout = ?config.connect_timeout,
                        transport = transport.name(),
                        "connect attempt timed out"
                    );
                    transport.close("connect timeout").await;
                    let _ = connection.apply(ConnectionEvent::Cancelled);
                }
            },
            left = wait_until(&mut states, |s| *s != ConnectionState::Connecting) => {
                if !left {
                    return;
                }
            },
        }
    }
}
