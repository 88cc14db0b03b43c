//! Pure logic for courier.
//!
//! Nothing in this crate performs I/O or reads the clock. Time is passed in by
//! the caller, which keeps every state machine deterministic under test.

pub mod backoff;
pub mod directory;
pub mod error;
pub mod health;
pub mod model;
pub mod state;

pub use backoff::{Backoff, ReconnectConfig};
pub use directory::{BatchStep, DiscardReason, VersionCheck, classify, plan_batch};
pub use error::{ConnError, TransitionError};
pub use health::{HealthConfig, KeepAliveAction, KeepAliveTracker};
pub use model::{
    AttachmentRecord, ContactRecord, Conversation, MessageContent, MessageRecord,
    PendingMessage, Reaction, SendStatus, SpeechToTextData, TranslateData,
};
pub use state::{ConnectionEvent, ConnectionState, ConnectionStateMachine};
