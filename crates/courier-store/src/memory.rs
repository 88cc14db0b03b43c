//! In-memory storage for tests and ephemeral sessions.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use courier_core::model::{
    AttachmentRecord, ContactRecord, Conversation, MessageRecord, PendingMessage, Reaction,
    SendStatus, SpeechToTextData, TranslateData,
};
use courier_proto::payloads::directory::ContactFields;

use super::{DirectoryStore, MessageStore, StoreError, check_status};

/// In-memory storage implementation for testing and simulation
///
/// All state lives behind one `Arc<Mutex<>>`, so every trait method is a
/// single critical section and therefore atomic with respect to other
/// callers. A poisoned lock surfaces as `StoreError::Io`.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    directory_version: u64,

    /// Contacts keyed by id (ordered for stable listing)
    contacts: BTreeMap<String, ContactRecord>,

    messages: HashMap<String, MessageRecord>,

    conversations: HashMap<String, Conversation>,

    pending: HashMap<String, PendingMessage>,

    read_positions: HashMap<String, u64>,

    /// Attachments keyed by (`message_id`, `attachment_id`)
    attachments: BTreeMap<(String, String), AttachmentRecord>,
}

impl MemoryStorageInner {
    fn insert_message(&mut self, record: &MessageRecord) {
        let conversation = self
            .conversations
            .entry(record.conversation_id.clone())
            .or_insert_with(|| Conversation {
                id: record.conversation_id.clone(),
                last_active_at: record.timestamp,
            });
        conversation.last_active_at = conversation.last_active_at.max(record.timestamp);

        self.messages.insert(record.id.clone(), record.clone());
    }

    fn delete_message(&mut self, id: &str) -> bool {
        self.attachments.retain(|(message_id, _), _| message_id != id);
        self.messages.remove(id).is_some()
    }
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(MemoryStorageInner::default())) }
    }

    /// Total number of stored messages.
    ///
    /// Useful for debugging and testing.
    pub fn message_count(&self) -> usize {
        self.lock().map(|inner| inner.messages.len()).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStorageInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Io("memory storage lock poisoned".to_string()))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryStore for MemoryStorage {
    fn directory_version(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.directory_version)
    }

    fn set_directory_version(&self, version: u64) -> Result<(), StoreError> {
        let mut inner = self.lock()?;

        if version < inner.directory_version {
            return Err(StoreError::Conflict(format!(
                "directory version cannot decrease from {} to {version}",
                inner.directory_version
            )));
        }

        inner.directory_version = version;
        Ok(())
    }

    fn load_contact(&self, id: &str) -> Result<Option<ContactRecord>, StoreError> {
        Ok(self.lock()?.contacts.get(id).cloned())
    }

    fn contacts(&self) -> Result<Vec<ContactRecord>, StoreError> {
        Ok(self.lock()?.contacts.values().cloned().collect())
    }

    fn replace_contact(&self, record: &ContactRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.contacts.remove(&record.id);
        inner.contacts.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn update_contact(
        &self,
        id: &str,
        fields: &ContactFields,
    ) -> Result<Option<ContactRecord>, StoreError> {
        let mut inner = self.lock()?;

        Ok(inner.contacts.get_mut(id).map(|record| {
            record.merge(fields);
            record.clone()
        }))
    }

    fn delete_contact(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.contacts.remove(id).is_some())
    }

    fn replace_directory(&self, records: &[ContactRecord]) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.contacts = records.iter().map(|r| (r.id.clone(), r.clone())).collect();
        Ok(())
    }
}

impl MessageStore for MemoryStorage {
    fn put_when_non_exist(&self, messages: &[MessageRecord]) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;

        let mut inserted = 0;
        for message in messages {
            if !inner.messages.contains_key(&message.id) {
                inner.insert_message(message);
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    fn put_messages(&self, messages: &[MessageRecord]) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        for message in messages {
            inner.insert_message(message);
        }
        Ok(())
    }

    fn load_message(&self, id: &str) -> Result<Option<MessageRecord>, StoreError> {
        Ok(self.lock()?.messages.get(id).cloned())
    }

    fn messages_in(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let inner = self.lock()?;

        let mut messages: Vec<_> = inner
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));

        Ok(messages)
    }

    fn conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let inner = self.lock()?;

        let mut conversations: Vec<_> = inner.conversations.values().cloned().collect();
        conversations.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at).then(a.id.cmp(&b.id)));

        Ok(conversations)
    }

    fn save_pending_message(&self, pending: &PendingMessage) -> Result<(), StoreError> {
        self.lock()?.pending.insert(pending.message_id.clone(), pending.clone());
        Ok(())
    }

    fn pending_messages(&self, limit: usize) -> Result<Vec<PendingMessage>, StoreError> {
        let inner = self.lock()?;

        let mut pending: Vec<_> = inner.pending.values().cloned().collect();
        pending.sort_by(|a, b| {
            (a.original_timestamp, &a.message_id).cmp(&(b.original_timestamp, &b.message_id))
        });
        pending.truncate(limit);

        Ok(pending)
    }

    fn promote_pending(
        &self,
        message_id: &str,
        record: &MessageRecord,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;

        inner.pending.remove(message_id);
        if inner.messages.contains_key(&record.id) {
            return Ok(false);
        }

        inner.insert_message(record);
        Ok(true)
    }

    fn discard_pending(&self, message_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.pending.remove(message_id).is_some())
    }

    fn update_send_status(
        &self,
        message: &MessageRecord,
        status: SendStatus,
    ) -> Result<SendStatus, StoreError> {
        let mut inner = self.lock()?;

        if let Some(stored) = inner.messages.get_mut(&message.id) {
            stored.send_status = check_status(&message.id, stored.send_status, status)?;
            return Ok(stored.send_status);
        }

        inner.insert_message(&message.clone().with_status(status));
        Ok(status)
    }

    fn update_read_position(
        &self,
        conversation_id: &str,
        read_max_timestamp: u64,
    ) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;

        let position = inner.read_positions.entry(conversation_id.to_string()).or_insert(0);
        *position = (*position).max(read_max_timestamp);

        Ok(*position)
    }

    fn read_position(&self, conversation_id: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.lock()?.read_positions.get(conversation_id).copied())
    }

    fn unread_count(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let inner = self.lock()?;
        let position = inner.read_positions.get(conversation_id).copied();

        Ok(inner
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| position.is_none_or(|p| m.timestamp > p))
            .count())
    }

    fn delete_messages(&self, ids: &[String]) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        Ok(ids.iter().filter(|id| inner.delete_message(id)).count())
    }

    fn remove_room_and_messages(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;

        let ids: Vec<String> = inner
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| m.id.clone())
            .collect();

        for id in &ids {
            inner.delete_message(id);
        }
        inner.conversations.remove(conversation_id);
        inner.read_positions.remove(conversation_id);

        Ok(ids.len())
    }

    fn update_message_reaction(
        &self,
        message_id: &str,
        reaction: &Reaction,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        Ok(inner.messages.get_mut(message_id).is_some_and(|m| m.apply_reaction(reaction)))
    }

    fn update_message_translate_data(
        &self,
        message_id: &str,
        data: &TranslateData,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;

        let Some(message) = inner.messages.get_mut(message_id) else {
            return Ok(false);
        };
        message.translation = Some(data.clone());

        Ok(true)
    }

    fn update_message_speech_to_text_data(
        &self,
        message_id: &str,
        data: &SpeechToTextData,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;

        let Some(message) = inner.messages.get_mut(message_id) else {
            return Ok(false);
        };
        message.speech_to_text = Some(data.clone());

        Ok(true)
    }

    fn put_attachment(&self, attachment: &AttachmentRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;

        if !inner.messages.contains_key(&attachment.message_id) {
            return Err(StoreError::NotFound(format!("message {}", attachment.message_id)));
        }

        inner
            .attachments
            .insert((attachment.message_id.clone(), attachment.id.clone()), attachment.clone());
        Ok(())
    }

    fn attachments_for(&self, message_id: &str) -> Result<Vec<AttachmentRecord>, StoreError> {
        let inner = self.lock()?;

        Ok(inner
            .attachments
            .iter()
            .filter(|((owner, _), _)| owner == message_id)
            .map(|(_, a)| a.clone())
            .collect())
    }
}
