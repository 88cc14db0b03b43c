//! Local data model.
//!
//! Records persisted by the storage layer plus the merge rules that keep
//! updates idempotent. Storage implementations call these rules inside their
//! own transactions so every backend behaves identically.

use courier_proto::payloads::directory::{ContactEntry, ContactFields};
use serde::{Deserialize, Serialize};

/// Local directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    /// Member identifier (unique)
    pub id: String,
    /// Display name
    pub name: Option<String>,
    /// Avatar blob reference
    pub avatar_ref: Option<String>,
    /// User-chosen handle
    pub custom_uid: Option<String>,
    /// Meeting configuration version
    pub meeting_version: u32,
    /// Publicly visible name
    pub public_name: Option<String>,
}

impl ContactRecord {
    /// Build a record from the fields of an `Add` change or snapshot entry.
    pub fn from_fields(id: impl Into<String>, fields: &ContactFields) -> Self {
        Self {
            id: id.into(),
            name: fields.name.clone(),
            avatar_ref: fields.avatar_ref.clone(),
            custom_uid: fields.custom_uid.clone(),
            meeting_version: fields.meeting_version.unwrap_or_default(),
            public_name: fields.public_name.clone(),
        }
    }

    /// Overwrite the fields present in `fields`; absent fields are kept.
    ///
    /// Returns `true` if anything changed.
    pub fn merge(&mut self, fields: &ContactFields) -> bool {
        let before = self.clone();

        if let Some(name) = &fields.name {
            self.name = Some(name.clone());
        }
        if let Some(avatar_ref) = &fields.avatar_ref {
            self.avatar_ref = Some(avatar_ref.clone());
        }
        if let Some(custom_uid) = &fields.custom_uid {
            self.custom_uid = Some(custom_uid.clone());
        }
        if let Some(meeting_version) = fields.meeting_version {
            self.meeting_version = meeting_version;
        }
        if let Some(public_name) = &fields.public_name {
            self.public_name = Some(public_name.clone());
        }

        *self != before
    }
}

impl From<&ContactEntry> for ContactRecord {
    fn from(entry: &ContactEntry) -> Self {
        Self::from_fields(entry.id.clone(), &entry.fields)
    }
}

/// Delivery status of a message.
///
/// ```text
/// Pending ──> Sent ──> Delivered
///    │  ^       │
///    ↓  │       ↓
///    Failed <───┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SendStatus {
    /// Stored locally, not yet accepted by the server
    Pending,
    /// Accepted by the server
    Sent,
    /// Received by the recipient (terminal)
    Delivered,
    /// Send failed; may be resent
    Failed,
}

impl SendStatus {
    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Re-applying the current status is allowed so redelivered receipts stay
    /// idempotent.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Pending | Self::Sent | Self::Delivered | Self::Failed)
                | (Self::Sent, Self::Sent | Self::Delivered | Self::Failed)
                | (Self::Delivered, Self::Delivered)
                | (Self::Failed, Self::Failed | Self::Pending)
        )
    }

    /// Delivered messages never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageContent {
    /// Decrypted text
    Text(String),
    /// Reference to ciphertext stored elsewhere
    CipherRef(String),
}

/// Emoji reaction on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    /// Reaction emoji
    pub emoji: String,
    /// Who reacted
    pub author_id: String,
    /// When the author reacted, Unix milliseconds
    pub origin_timestamp: u64,
    /// The author withdrew the reaction
    pub removed: bool,
}

/// Machine translation attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateData {
    /// Target language tag
    pub language: String,
    /// Translated text
    pub text: String,
}

/// Transcript of a voice message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechToTextData {
    /// Transcribed text
    pub text: String,
    /// Transcription finished
    pub complete: bool,
}

/// Stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Message id (unique, idempotency key)
    pub id: String,
    /// Conversation the message belongs to
    pub conversation_id: String,
    /// Sender identifier
    pub sender_id: String,
    /// Origin timestamp, Unix milliseconds
    pub timestamp: u64,
    /// Delivery status
    pub send_status: SendStatus,
    /// Body
    pub content: MessageContent,
    /// Reactions, one per `(emoji, author)`
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    /// Translation, if requested
    #[serde(default)]
    pub translation: Option<TranslateData>,
    /// Transcript, if requested
    #[serde(default)]
    pub speech_to_text: Option<SpeechToTextData>,
}

impl MessageRecord {
    /// Create a text message with no reactions or annotations.
    pub fn text(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        timestamp: u64,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            timestamp,
            send_status: SendStatus::Pending,
            content: MessageContent::Text(body.into()),
            reactions: Vec::new(),
            translation: None,
            speech_to_text: None,
        }
    }

    /// Builder form for the status.
    #[must_use]
    pub fn with_status(mut self, status: SendStatus) -> Self {
        self.send_status = status;
        self
    }

    /// Apply a reaction update with last-writer-wins on `origin_timestamp`.
    ///
    /// An update older than (or as old as) the stored entry for the same
    /// `(emoji, author)` is ignored. A newer removal deletes the entry.
    /// Returns `true` if the record changed.
    pub fn apply_reaction(&mut self, reaction: &Reaction) -> bool {
        let existing = self
            .reactions
            .iter()
            .position(|r| r.emoji == reaction.emoji && r.author_id == reaction.author_id);

        match existing {
            Some(idx) if self.reactions[idx].origin_timestamp >= reaction.origin_timestamp => false,
            Some(idx) if reaction.removed => {
                self.reactions.remove(idx);
                true
            },
            Some(idx) => {
                self.reactions[idx] = reaction.clone();
                true
            },
            None if reaction.removed => false,
            None => {
                self.reactions.push(reaction.clone());
                true
            },
        }
    }
}

/// Envelope that could not be processed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    /// Id of the message inside the envelope
    pub message_id: String,
    /// Origin timestamp, Unix milliseconds
    pub original_timestamp: u64,
    /// Encoded envelope, kept verbatim for a later attempt
    pub raw_envelope: Vec<u8>,
}

/// Conversation summary, created implicitly by the first stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id (equals the contact id for one-to-one chats)
    pub id: String,
    /// Timestamp of the newest stored message
    pub last_active_at: u64,
}

/// Attachment metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    /// Attachment id
    pub id: String,
    /// Owning message
    pub message_id: String,
    /// MIME type
    pub content_type: String,
    /// Size in bytes
    pub size: u64,
    /// Remote blob reference
    pub remote_ref: Option<String>,
    /// Content digest
    pub digest: Option<Vec<u8>>,
}
