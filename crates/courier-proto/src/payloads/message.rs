//! Message payloads.

use serde::{Deserialize, Serialize};

/// Encrypted message envelope.
///
/// Delivery is at-least-once: the same `message_id` may arrive again after a
/// reconnect and receivers must deduplicate on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Globally unique message id (idempotency key)
    pub message_id: String,

    /// Conversation the message belongs to
    pub conversation_id: String,

    /// Sender identifier
    pub sender_id: String,

    /// Origin timestamp, Unix milliseconds
    pub timestamp: u64,

    /// Encrypted body
    pub ciphertext: Vec<u8>,
}

/// Delivery receipt for a message the local client sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Id of the acknowledged message
    pub message_id: String,

    /// What the receipt acknowledges
    pub kind: ReceiptKind,
}

/// Receipt kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptKind {
    /// Server accepted the message
    Accepted,
    /// Recipient device received the message
    Delivered,
}
