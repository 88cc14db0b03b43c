//! Connection lifecycle state machine.
//!
//! Aggregates transport and health events into one [`ConnectionState`]. The
//! machine only validates and records transitions; deciding when to reconnect
//! is left to the caller.
//!
//! # State Machine
//!
//! ```text
//!                 connect              opened
//! ┌──────────────┐──────>┌────────────┐──────>┌───────────┐
//! │ Disconnected │       │ Connecting │       │ Connected │
//! └──────────────┘<──────└────────────┘       └───────────┘
//!        ^   cancelled        │  │ failed(e)        │
//!        │                    │  ↓                  │
//!        │           retry  ┌──────────────────┐    │
//!        │        ┌─────────│ AuthFailed       │    │
//!        │        │         │ UnknownHostFailed│    │
//!        │        ↓         │ InactiveFailed   │    │
//!        │   Connecting     │ Failed           │    │
//!        │                  └──────────────────┘    │
//!        └──────────────────────────────────────────┘
//!                    stalled / closed
//! ```

use std::fmt;

use crate::error::{ConnError, TransitionError};

/// Externally visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and no attempt in progress
    Disconnected,
    /// Connect attempt in progress
    Connecting,
    /// Handshake completed, frames flow
    Connected,
    /// Server rejected the credentials
    AuthFailed,
    /// Server host could not be resolved
    UnknownHostFailed,
    /// Server reported the account as inactive
    InactiveFailed,
    /// Any other connect failure
    Failed,
}

impl ConnectionState {
    /// One of the failure states a retry can leave.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            Self::AuthFailed | Self::UnknownHostFailed | Self::InactiveFailed | Self::Failed
        )
    }

    /// States from which a reconnect policy should start a new attempt.
    #[must_use]
    pub const fn wants_reconnect(self) -> bool {
        matches!(self, Self::Disconnected) || self.is_failure()
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::AuthFailed => "auth-failed",
            Self::UnknownHostFailed => "unknown-host-failed",
            Self::InactiveFailed => "inactive-failed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Caller asked for a connection from `Disconnected`
    ConnectRequested,
    /// Caller asked to leave a failure state
    RetryRequested,
    /// Transport finished the handshake
    Opened,
    /// Transport reported an error
    Failed(ConnError),
    /// Health monitor declared the connection dead
    Stalled,
    /// Transport closed
    Closed,
    /// Connect attempt abandoned (watchdog or shutdown)
    Cancelled,
}

impl ConnectionEvent {
    /// Short name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConnectRequested => "connect-requested",
            Self::RetryRequested => "retry-requested",
            Self::Opened => "opened",
            Self::Failed(_) => "failed",
            Self::Stalled => "stalled",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Target state for `event` in `state`, or `None` if the pair is invalid.
#[must_use]
pub fn next_state(state: ConnectionState, event: &ConnectionEvent) -> Option<ConnectionState> {
    use ConnectionEvent as E;
    use ConnectionState as S;

    match (state, event) {
        (S::Disconnected, E::ConnectRequested | E::RetryRequested) => Some(S::Connecting),
        (S::Connecting, E::Opened) => Some(S::Connected),
        (S::Connecting, E::Failed(err)) => Some(err.failure_state()),
        (S::Connecting, E::Cancelled) => Some(S::Disconnected),
        (S::Connected, E::Stalled | E::Closed | E::Failed(_)) => Some(S::Disconnected),
        (from, E::RetryRequested) if from.is_failure() => Some(S::Connecting),
        _ => None,
    }
}

/// Connection state machine
///
/// One instance per connection. Exactly one current state; transitions are
/// applied in the order events are handed to [`Self::handle`].
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    last_error: Option<ConnError>,
    transitions: u64,
}

impl ConnectionStateMachine {
    /// Create a machine in [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        Self { state: ConnectionState::Disconnected, last_error: None, transitions: 0 }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Error behind the most recent failure, cleared on a successful open.
    #[must_use]
    pub fn last_error(&self) -> Option<&ConnError> {
        self.last_error.as_ref()
    }

    /// Number of accepted transitions since creation.
    #[must_use]
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Apply an event.
    ///
    /// # Errors
    ///
    /// - `TransitionError` if the event is not valid in the current state. The
    ///   state is unchanged.
    pub fn handle(&mut self, event: ConnectionEvent) -> Result<ConnectionState, TransitionError> {
        let Some(next) = next_state(self.state, &event) else {
            return Err(TransitionError { from: self.state, event: event.name() });
        };

        match event {
            ConnectionEvent::Opened => self.last_error = None,
            ConnectionEvent::Failed(err) => self.last_error = Some(err),
            _ => {},
        }

        self.state = next;
        self.transitions += 1;

        Ok(next)
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
