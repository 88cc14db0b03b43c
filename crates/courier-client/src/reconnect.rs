//! Reconnect policy driver.
//!
//! Watches the connection state and starts a new connect attempt whenever the
//! state leaves `Connected` for `Disconnected` or one of the failure states.
//! Delays come from [`Backoff`]; they reset once a connection is established
//! or when [`Reconnector::wake`] is called.

use std::sync::Arc;

use courier_core::{Backoff, ConnectionState, ReconnectConfig};
use rand::{SeedableRng, rngs::StdRng};
use tokio::{sync::Notify, task::JoinHandle};

use crate::{connection::ConnectionHandle, transport::Transport};

/// Background reconnect task for one transport.
pub struct Reconnector {
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Reconnector {
    /// Spawn the reconnect loop.
    ///
    /// A connection that is currently `Disconnected` is connected right away.
    pub fn spawn<T: Transport>(
        config: ReconnectConfig,
        transport: Arc<T>,
        connection: ConnectionHandle,
    ) -> Self {
        Self::spawn_with_rng(config, transport, connection, StdRng::from_entropy())
    }

    /// Spawn with a caller-provided RNG for deterministic jitter.
    pub fn spawn_with_rng<T: Transport>(
        config: ReconnectConfig,
        transport: Arc<T>,
        connection: ConnectionHandle,
        rng: StdRng,
    ) -> Self {
        let wake = Arc::new(Notify::new());
        let task =
            tokio::spawn(reconnect_loop(config, transport, connection, Arc::clone(&wake), rng));

        Self { wake, task }
    }

    /// Retry now, skipping any remaining backoff.
    ///
    /// Meant for network-change and foreground triggers. Resets the attempt
    /// counter, so an exhausted policy starts over.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Stop reconnecting.
    pub fn stop(&self) {
        self.task.abort();
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Reconnector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn reconnect_loop<T: Transport>(
    config: ReconnectConfig,
    transport: Arc<T>,
    connection: ConnectionHandle,
    wake: Arc<Notify>,
    mut rng: StdRng,
) {
    let mut states = connection.subscribe();
    let mut backoff = Backoff::new(config);

    loop {
        let state = *states.borrow_and_update();

        if state == ConnectionState::Connected {
            backoff.reset();
        }

        if !state.wants_reconnect() {
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        return;
                    }
                },
                () = wake.notified() => backoff.reset(),
            }
            continue;
        }

        let Some(delay) = backoff.next_delay(&mut rng) else {
            tracing::warn!(
                attempts = backoff.attempts(),
                %state,
                transport = transport.name(),
                "reconnect attempts exhausted"
            );
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        return;
                    }
                },
                () = wake.notified() => backoff.reset(),
            }
            continue;
        };

        if !delay.is_zero() {
            tracing::debug!(attempt = backoff.attempts(), ?delay, %state, "reconnect scheduled");
            tokio::select! {
                () = tokio::time::sleep(delay) => {},
                () = wake.notified() => {
                    tracing::debug!("reconnect woken early");
                    backoff.reset();
                },
            }
        }

        // Something else may have connected during the wait
        if !connection.current().wants_reconnect() || connection.request_connect().is_err() {
            continue;
        }

        tracing::info!(attempt = backoff.attempts(), transport = transport.name(), "reconnecting");
        if let Err(e) = transport.connect().await {
            tracing::debug!(attempt = backoff.attempts(), error = %e, "reconnect attempt failed");
        }
    }
}
