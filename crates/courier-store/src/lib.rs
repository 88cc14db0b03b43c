//! Storage abstraction for courier
//!
//! Two synchronous traits split by owner: [`DirectoryStore`] holds the contact
//! directory and its version, written only by the directory sync worker;
//! [`MessageStore`] holds messages, pending envelopes, read positions and
//! attachment metadata.
//!
//! Every mutating method runs as one atomic unit: readers never observe a
//! half-applied write (for example a contact deleted but not yet re-inserted).
//! Writes to the same entity are serialized by the implementation, not by
//! callers.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStorage;
use courier_core::model::{
    AttachmentRecord, ContactRecord, Conversation, MessageRecord, PendingMessage, Reaction,
    SendStatus, SpeechToTextData, TranslateData,
};
use courier_proto::payloads::directory::ContactFields;
pub use error::StoreError;
pub use memory::MemoryStorage;

pub use self::redb::RedbStorage;

/// Persistent contact directory.
///
/// Must be Clone (shared between tasks), Send + Sync, and synchronous.
/// Implementations share internal state via Arc, so clones access the same
/// underlying storage.
pub trait DirectoryStore: Clone + Send + Sync + 'static {
    /// Last durably applied directory version (0 when never synced).
    fn directory_version(&self) -> Result<u64, StoreError>;

    /// Persist the applied directory version.
    ///
    /// # Errors
    ///
    /// - `StoreError::Conflict` if `version` is lower than the stored value
    fn set_directory_version(&self, version: u64) -> Result<(), StoreError>;

    /// Load one contact. `None` if unknown.
    fn load_contact(&self, id: &str) -> Result<Option<ContactRecord>, StoreError>;

    /// All contacts, ordered by id.
    fn contacts(&self) -> Result<Vec<ContactRecord>, StoreError>;

    /// Delete any record with the same id and insert `record`, atomically.
    fn replace_contact(&self, record: &ContactRecord) -> Result<(), StoreError>;

    /// Merge `fields` into an existing contact.
    ///
    /// Returns the merged record, or `None` if the contact does not exist (in
    /// which case nothing is written).
    fn update_contact(
        &self,
        id: &str,
        fields: &ContactFields,
    ) -> Result<Option<ContactRecord>, StoreError>;

    /// Delete a contact. Returns `true` if it existed.
    fn delete_contact(&self, id: &str) -> Result<bool, StoreError>;

    /// Replace the whole directory with `records`, atomically.
    fn replace_directory(&self, records: &[ContactRecord]) -> Result<(), StoreError>;
}

/// Persistent message log.
///
/// Same sharing rules as [`DirectoryStore`].
pub trait MessageStore: Clone + Send + Sync + 'static {
    /// Insert messages whose id is not stored yet; existing rows are left
    /// untouched even if the payload differs.
    ///
    /// Returns the number of inserted messages.
    fn put_when_non_exist(&self, messages: &[MessageRecord]) -> Result<usize, StoreError>;

    /// Insert or overwrite messages (locally originated).
    fn put_messages(&self, messages: &[MessageRecord]) -> Result<(), StoreError>;

    /// Load one message. `None` if unknown.
    fn load_message(&self, id: &str) -> Result<Option<MessageRecord>, StoreError>;

    /// Messages of a conversation ordered by timestamp, then id.
    fn messages_in(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, StoreError>;

    /// Known conversations, most recently active first.
    fn conversations(&self) -> Result<Vec<Conversation>, StoreError>;

    /// Persist an envelope that cannot be processed yet (insert or replace).
    fn save_pending_message(&self, pending: &PendingMessage) -> Result<(), StoreError>;

    /// Oldest pending envelopes first, at most `limit`.
    fn pending_messages(&self, limit: usize) -> Result<Vec<PendingMessage>, StoreError>;

    /// Remove the pending row and insert `record` if its id is not stored yet,
    /// atomically.
    ///
    /// Returns `true` if the record was inserted.
    fn promote_pending(&self, message_id: &str, record: &MessageRecord)
    -> Result<bool, StoreError>;

    /// Drop a pending envelope. Returns `true` if it existed.
    fn discard_pending(&self, message_id: &str) -> Result<bool, StoreError>;

    /// Move a message to `status`, inserting it with that status if absent.
    ///
    /// Returns the stored status.
    ///
    /// # Errors
    ///
    /// - `StoreError::Conflict` if the stored status cannot move to `status`
    ///   (for example `Delivered -> Sent`)
    fn update_send_status(
        &self,
        message: &MessageRecord,
        status: SendStatus,
    ) -> Result<SendStatus, StoreError>;

    /// Raise the read position of a conversation to at least
    /// `read_max_timestamp`. Never lowers it.
    ///
    /// Returns the stored position.
    fn update_read_position(
        &self,
        conversation_id: &str,
        read_max_timestamp: u64,
    ) -> Result<u64, StoreError>;

    /// Read position of a conversation. `None` if never read.
    fn read_position(&self, conversation_id: &str) -> Result<Option<u64>, StoreError>;

    /// Messages newer than the read position.
    fn unread_count(&self, conversation_id: &str) -> Result<usize, StoreError>;

    /// Delete messages and their attachments. Returns how many existed.
    fn delete_messages(&self, ids: &[String]) -> Result<usize, StoreError>;

    /// Delete a conversation with its messages, attachments and read position.
    ///
    /// Returns the number of deleted messages.
    fn remove_room_and_messages(&self, conversation_id: &str) -> Result<usize, StoreError>;

    /// Apply a reaction update. No-op (`false`) if the message is unknown or
    /// the update is older than the stored reaction.
    fn update_message_reaction(
        &self,
        message_id: &str,
        reaction: &Reaction,
    ) -> Result<bool, StoreError>;

    /// Attach translation data. No-op (`false`) if the message is unknown.
    fn update_message_translate_data(
        &self,
        message_id: &str,
        data: &TranslateData,
    ) -> Result<bool, StoreError>;

    /// Attach transcript data. No-op (`false`) if the message is unknown.
    fn update_message_speech_to_text_data(
        &self,
        message_id: &str,
        data: &SpeechToTextData,
    ) -> Result<bool, StoreError>;

    /// Store attachment metadata.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the owning message is unknown
    fn put_attachment(&self, attachment: &AttachmentRecord) -> Result<(), StoreError>;

    /// Attachments of a message, ordered by id.
    fn attachments_for(&self, message_id: &str) -> Result<Vec<AttachmentRecord>, StoreError>;
}

/// Shared status check used by every backend.
pub(crate) fn check_status(
    id: &str,
    from: SendStatus,
    to: SendStatus,
) -> Result<SendStatus, StoreError> {
    if from.can_transition_to(to) {
        Ok(to)
    } else {
        Err(StoreError::Conflict(format!("message {id}: cannot move from {from:?} to {to:?}")))
    }
}
