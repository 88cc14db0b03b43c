//! Fuzz target for the connection state machine
//!
//! # Invariants
//!
//! - Rejected events leave the state and transition count untouched
//! - Accepted events land exactly where `next_state` says
//! - `Connected` is only ever entered from `Connecting`
//! - `last_error` is cleared by every successful open

#![no_main]

use arbitrary::Arbitrary;
use courier_core::{
    state::next_state, ConnError, ConnectionEvent, ConnectionState, ConnectionStateMachine,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum Event {
    ConnectRequested,
    RetryRequested,
    Opened,
    Failed(FailureKind),
    Stalled,
    Closed,
    Cancelled,
}

#[derive(Debug, Clone, Arbitrary)]
enum FailureKind {
    Dns,
    Auth,
    Inactive,
    Io,
    Timeout,
    Closed,
}

impl Event {
    fn into_event(self) -> ConnectionEvent {
        match self {
            Self::ConnectRequested => ConnectionEvent::ConnectRequested,
            Self::RetryRequested => ConnectionEvent::RetryRequested,
            Self::Opened => ConnectionEvent::Opened,
            Self::Failed(kind) => ConnectionEvent::Failed(match kind {
                FailureKind::Dns => ConnError::DnsFailure("fuzz".into()),
                FailureKind::Auth => ConnError::AuthRejected("fuzz".into()),
                FailureKind::Inactive => ConnError::AccountInactive("fuzz".into()),
                FailureKind::Io => ConnError::IoFailure("fuzz".into()),
                FailureKind::Timeout => ConnError::Timeout(std::time::Duration::from_secs(10)),
                FailureKind::Closed => ConnError::Closed,
            }),
            Self::Stalled => ConnectionEvent::Stalled,
            Self::Closed => ConnectionEvent::Closed,
            Self::Cancelled => ConnectionEvent::Cancelled,
        }
    }
}

fuzz_target!(|events: Vec<Event>| {
    let mut machine = ConnectionStateMachine::new();

    for event in events {
        let event = event.into_event();
        let before = machine.state();
        let transitions = machine.transitions();
        let expected = next_state(before, &event);
        let opened = event == ConnectionEvent::Opened;

        match machine.handle(event) {
            Ok(state) => {
                assert_eq!(Some(state), expected);
                assert_eq!(machine.state(), state);
                assert_eq!(machine.transitions(), transitions + 1);

                if state == ConnectionState::Connected {
                    assert_eq!(before, ConnectionState::Connecting);
                }
                if opened {
                    assert!(machine.last_error().is_none());
                }
            },
            Err(_) => {
                assert_eq!(expected, None);
                assert_eq!(machine.state(), before);
                assert_eq!(machine.transitions(), transitions);
            },
        }
    }
});
