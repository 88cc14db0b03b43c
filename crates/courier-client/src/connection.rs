//! Shared connection state.
//!
//! [`ConnectionHandle`] owns the one [`ConnectionStateMachine`] of a session
//! and republishes every accepted transition on a watch channel. Components
//! never mutate the state directly; they submit events and observe the
//! channel.

#![allow(clippy::disallowed_types, reason = "State lock is never held across an await")]

use std::sync::{Arc, Mutex, PoisonError};

use courier_core::{
    ConnError, ConnectionEvent, ConnectionState, ConnectionStateMachine, TransitionError,
};
use tokio::sync::watch;

struct Shared {
    machine: Mutex<ConnectionStateMachine>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Cloneable handle to a session's connection state.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Start in `Disconnected`.
    pub fn new() -> Self {
        let machine = ConnectionStateMachine::new();
        let (state_tx, _) = watch::channel(machine.state());

        Self { shared: Arc::new(Shared { machine: Mutex::new(machine), state_tx }) }
    }

    /// Feed one event to the machine and publish the new state.
    ///
    /// Rejected events leave the state unchanged; they are expected for late
    /// callbacks after teardown and are logged at debug level.
    pub fn apply(&self, event: ConnectionEvent) -> Result<ConnectionState, TransitionError> {
        let mut machine = self.shared.machine.lock().unwrap_or_else(PoisonError::into_inner);
        self.handle(&mut machine, event)
    }

    /// Request a connect attempt from whatever idle or failed state we are in.
    pub fn request_connect(&self) -> Result<ConnectionState, TransitionError> {
        let mut machine = self.shared.machine.lock().unwrap_or_else(PoisonError::into_inner);

        let event = if machine.state() == ConnectionState::Disconnected {
            ConnectionEvent::ConnectRequested
        } else {
            ConnectionEvent::RetryRequested
        };
        self.handle(&mut machine, event)
    }

    fn handle(
        &self,
        machine: &mut ConnectionStateMachine,
        event: ConnectionEvent,
    ) -> Result<ConnectionState, TransitionError> {
        let name = event.name();
        match machine.handle(event) {
            Ok(state) => {
                tracing::debug!(event = name, %state, "connection transition");
                self.shared.state_tx.send_replace(state);
                Ok(state)
            },
            Err(err) => {
                tracing::debug!(error = %err, "ignoring connection event");
                Err(err)
            },
        }
    }

    /// Current state.
    pub fn current(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Error of the most recent failed attempt.
    pub fn last_error(&self) -> Option<ConnError> {
        self.shared.machine.lock().unwrap_or_else(PoisonError::into_inner).last_error().cloned()
    }

    /// Number of accepted transitions.
    pub fn transitions(&self) -> u64 {
        self.shared.machine.lock().unwrap_or_else(PoisonError::into_inner).transitions()
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}
