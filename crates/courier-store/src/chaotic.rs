//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that randomly fails operations to test error handling and
//! recovery of the sync worker and the message router.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use courier_core::model::{
    AttachmentRecord, ContactRecord, Conversation, MessageRecord, PendingMessage, Reaction,
    SendStatus, SpeechToTextData, TranslateData,
};
use courier_proto::payloads::directory::ContactFields;

use super::{DirectoryStore, MessageStore, StoreError};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but fails operations
/// with the configured probability before they reach it, so a failed call
/// never leaves a partial write behind. Clones share the RNG and counter.
#[derive(Clone)]
pub struct ChaoticStorage<S> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    operation_count: Arc<AtomicUsize>,
    /// Operations forced to fail once, by trait method name
    scripted: Arc<Mutex<Vec<&'static str>>>,
}

/// Linear congruential generator; same seed, same failure pattern.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: DirectoryStore + MessageStore> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
            scripted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted, failed ones included.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    /// Make the next call to `operation` fail, independent of the failure
    /// rate. `operation` is the trait method name, e.g. `"replace_contact"`.
    pub fn fail_next(&self, operation: &'static str) {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.push(operation);
        }
    }

    /// Count the operation and decide whether it fails.
    fn roll(&self, operation: &'static str) -> Result<(), StoreError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);

        let mut scripted = self
            .scripted
            .lock()
            .map_err(|_| StoreError::Io("chaotic script lock poisoned".to_string()))?;
        if let Some(pos) = scripted.iter().position(|op| *op == operation) {
            scripted.remove(pos);
            return Err(StoreError::Io(format!("scripted {operation} failure")));
        }
        drop(scripted);

        let roll = self
            .rng
            .lock()
            .map_err(|_| StoreError::Io("chaotic rng lock poisoned".to_string()))?
            .next();

        if roll < self.failure_rate {
            return Err(StoreError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

impl<S: DirectoryStore + MessageStore> DirectoryStore for ChaoticStorage<S> {
    fn directory_version(&self) -> Result<u64, StoreError> {
        self.roll("directory_version")?;
        self.inner.directory_version()
    }

    fn set_directory_version(&self, version: u64) -> Result<(), StoreError> {
        self.roll("set_directory_version")?;
        self.inner.set_directory_version(version)
    }

    fn load_contact(&self, id: &str) -> Result<Option<ContactRecord>, StoreError> {
        self.roll("load_contact")?;
        self.inner.load_contact(id)
    }

    fn contacts(&self) -> Result<Vec<ContactRecord>, StoreError> {
        self.roll("contacts")?;
        self.inner.contacts()
    }

    fn replace_contact(&self, record: &ContactRecord) -> Result<(), StoreError> {
        self.roll("replace_contact")?;
        self.inner.replace_contact(record)
    }

    fn update_contact(
        &self,
        id: &str,
        fields: &ContactFields,
    ) -> Result<Option<ContactRecord>, StoreError> {
        self.roll("update_contact")?;
        self.inner.update_contact(id, fields)
    }

    fn delete_contact(&self, id: &str) -> Result<bool, StoreError> {
        self.roll("delete_contact")?;
        self.inner.delete_contact(id)
    }

    fn replace_directory(&self, records: &[ContactRecord]) -> Result<(), StoreError> {
        self.roll("replace_directory")?;
        self.inner.replace_directory(records)
    }
}

impl<S: DirectoryStore + MessageStore> MessageStore for ChaoticStorage<S> {
    fn put_when_non_exist(&self, messages: &[MessageRecord]) -> Result<usize, StoreError> {
        self.roll("put_when_non_exist")?;
        self.inner.put_when_non_exist(messages)
    }

    fn put_messages(&self, messages: &[MessageRecord]) -> Result<(), StoreError> {
        self.roll("put_messages")?;
        self.inner.put_messages(messages)
    }

    fn load_message(&self, id: &str) -> Result<Option<MessageRecord>, StoreError> {
        self.roll("load_message")?;
        self.inner.load_message(id)
    }

    fn messages_in(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        self.roll("messages_in")?;
        self.inner.messages_in(conversation_id)
    }

    fn conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        self.roll("conversations")?;
        self.inner.conversations()
    }

    fn save_pending_message(&self, pending: &PendingMessage) -> Result<(), StoreError> {
        self.roll("save_pending_message")?;
        self.inner.save_pending_message(pending)
    }

    fn pending_messages(&self, limit: usize) -> Result<Vec<PendingMessage>, StoreError> {
        self.roll("pending_messages")?;
        self.inner.pending_messages(limit)
    }

    fn promote_pending(
        &self,
        message_id: &str,
        record: &MessageRecord,
    ) -> Result<bool, StoreError> {
        self.roll("promote_pending")?;
        self.inner.promote_pending(message_id, record)
    }

    fn discard_pending(&self, message_id: &str) -> Result<bool, StoreError> {
        self.roll("discard_pending")?;
        self.inner.discard_pending(message_id)
    }

    fn update_send_status(
        &self,
        message: &MessageRecord,
        status: SendStatus,
    ) -> Result<SendStatus, StoreError> {
        self.roll("update_send_status")?;
        self.inner.update_send_status(message, status)
    }

    fn update_read_position(
        &self,
        conversation_id: &str,
        read_max_timestamp: u64,
    ) -> Result<u64, StoreError> {
        self.roll("update_read_position")?;
        self.inner.update_read_position(conversation_id, read_max_timestamp)
    }

    fn read_position(&self, conversation_id: &str) -> Result<Option<u64>, StoreError> {
        self.roll("read_position")?;
        self.inner.read_position(conversation_id)
    }

    fn unread_count(&self, conversation_id: &str) -> Result<usize, StoreError> {
        self.roll("unread_count")?;
        self.inner.unread_count(conversation_id)
    }

    fn delete_messages(&self, ids: &[String]) -> Result<usize, StoreError> {
        self.roll("delete_messages")?;
        self.inner.delete_messages(ids)
    }

    fn remove_room_and_messages(&self, conversation_id: &str) -> Result<usize, StoreError> {
        self.roll("remove_room_and_messages")?;
        self.inner.remove_room_and_messages(conversation_id)
    }

    fn update_message_reaction(
        &self,
        message_id: &str,
        reaction: &Reaction,
    ) -> Result<bool, StoreError> {
        self.roll("update_message_reaction")?;
        self.inner.update_message_reaction(message_id, reaction)
    }

    fn update_message_translate_data(
        &self,
        message_id: &str,
        data: &TranslateData,
    ) -> Result<bool, StoreError> {
        self.roll("update_message_translate_data")?;
        self.inner.update_message_translate_data(message_id, data)
    }

    fn update_message_speech_to_text_data(
        &self,
        message_id: &str,
        data: &SpeechToTextData,
    ) -> Result<bool, StoreError> {
        self.roll("update_message_speech_to_text_data")?;
        self.inner.update_message_speech_to_text_data(message_id, data)
    }

    fn put_attachment(&self, attachment: &AttachmentRecord) -> Result<(), StoreError> {
        self.roll("put_attachment")?;
        self.inner.put_attachment(attachment)
    }

    fn attachments_for(&self, message_id: &str) -> Result<Vec<AttachmentRecord>, StoreError> {
        self.roll("attachments_for")?;
        self.inner.attachments_for(message_id)
    }
}
