//! Error types for connection handling.
//!
//! Each transport failure maps to exactly one [`ConnError`] kind so the state
//! machine can choose the matching terminal or retryable state.

use std::{io, time::Duration};

use courier_proto::ProtocolError;
use thiserror::Error;

use crate::state::ConnectionState;

/// Errors surfaced by a connection transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnError {
    /// Server host name could not be resolved
    #[error("host resolution failed: {0}")]
    DnsFailure(String),

    /// TLS or QUIC handshake failed
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Server rejected the credentials
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// Server reported the account as deactivated
    #[error("account inactive: {0}")]
    AccountInactive(String),

    /// Peer sent something the protocol does not allow
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Generic network failure
    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// Connection attempt did not complete in time
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// Transport was closed locally
    #[error("connection closed")]
    Closed,
}

impl ConnError {
    /// State a connection enters when a connect attempt fails with this error.
    #[must_use]
    pub fn failure_state(&self) -> ConnectionState {
        match self {
            Self::DnsFailure(_) => ConnectionState::UnknownHostFailed,
            Self::AuthRejected(_) => ConnectionState::AuthFailed,
            Self::AccountInactive(_) => ConnectionState::InactiveFailed,
            Self::Closed => ConnectionState::Disconnected,
            Self::Handshake(_) | Self::Protocol(_) | Self::IoFailure(_) | Self::Timeout(_) => {
                ConnectionState::Failed
            },
        }
    }

    /// Returns true if a plain retry has a reasonable chance of succeeding.
    ///
    /// Credential and account problems need user action first.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::AuthRejected(_) | Self::AccountInactive(_))
    }
}

impl From<ProtocolError> for ConnError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<io::Error> for ConnError {
    fn from(err: io::Error) -> Self {
        Self::IoFailure(err.to_string())
    }
}

/// Rejected state machine transition.
///
/// Returned when an event is not valid for the current state. The state is
/// left unchanged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid transition: {event} in state {from}")]
pub struct TransitionError {
    /// State when the event arrived
    pub from: ConnectionState,
    /// Name of the rejected event
    pub event: &'static str,
}
