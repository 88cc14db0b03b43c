//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Every
//! trait method runs in exactly one transaction, so a crash leaves either the
//! old or the new state on disk.

use std::{fmt::Display, path::Path, sync::Arc};

use courier_core::model::{
    AttachmentRecord, ContactRecord, Conversation, MessageRecord, PendingMessage, Reaction,
    SendStatus, SpeechToTextData, TranslateData,
};
use courier_proto::payloads::directory::ContactFields;
use redb::{Database, ReadableTable, Table, TableDefinition, WriteTransaction};
use serde::{Serialize, de::DeserializeOwned};

use super::{DirectoryStore, MessageStore, StoreError, check_status};

/// Table: meta
/// Key: setting name
/// Value: u64 (currently only `directory_version`)
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Table: contacts
/// Key: contact id
/// Value: CBOR-encoded ContactRecord
const CONTACTS: TableDefinition<&str, &[u8]> = TableDefinition::new("contacts");

/// Table: messages
/// Key: message id
/// Value: CBOR-encoded MessageRecord
const MESSAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("messages");

/// Table: conversation_index
/// Key: conversation_id ++ 0x00 ++ timestamp (8 bytes BE) ++ message_id
/// Value: message id
const CONVERSATION_INDEX: TableDefinition<&[u8], &str> =
    TableDefinition::new("conversation_index");

/// Table: conversations
/// Key: conversation id
/// Value: last_active_at
const CONVERSATIONS: TableDefinition<&str, u64> = TableDefinition::new("conversations");

/// Table: read_positions
/// Key: conversation id
/// Value: highest read timestamp
const READ_POSITIONS: TableDefinition<&str, u64> = TableDefinition::new("read_positions");

/// Table: pending
/// Key: message id
/// Value: CBOR-encoded PendingMessage
const PENDING: TableDefinition<&str, &[u8]> = TableDefinition::new("pending");

/// Table: attachments
/// Key: message_id ++ 0x00 ++ attachment_id
/// Value: CBOR-encoded AttachmentRecord
const ATTACHMENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("attachments");

const DIRECTORY_VERSION_KEY: &str = "directory_version";

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates all tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(META).map_err(io)?;
            let _ = txn.open_table(CONTACTS).map_err(io)?;
            let _ = txn.open_table(MESSAGES).map_err(io)?;
            let _ = txn.open_table(CONVERSATION_INDEX).map_err(io)?;
            let _ = txn.open_table(CONVERSATIONS).map_err(io)?;
            let _ = txn.open_table(READ_POSITIONS).map_err(io)?;
            let _ = txn.open_table(PENDING).map_err(io)?;
            let _ = txn.open_table(ATTACHMENTS).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        tracing::debug!(path = %path.as_ref().display(), "storage opened");

        Ok(Self { db: Arc::new(db) })
    }

    /// Run `f` inside one write transaction and commit on success.
    fn write<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let txn = self.db.begin_write().map_err(io)?;
        let value = f(&txn)?;
        txn.commit().map_err(io)?;
        Ok(value)
    }
}

impl DirectoryStore for RedbStorage {
    fn directory_version(&self) -> Result<u64, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(META).map_err(io)?;

        Ok(table.get(DIRECTORY_VERSION_KEY).map_err(io)?.map(|v| v.value()).unwrap_or(0))
    }

    fn set_directory_version(&self, version: u64) -> Result<(), StoreError> {
        self.write(|txn| {
            let mut table = txn.open_table(META).map_err(io)?;

            let current =
                table.get(DIRECTORY_VERSION_KEY).map_err(io)?.map(|v| v.value()).unwrap_or(0);
            if version < current {
                return Err(StoreError::Conflict(format!(
                    "directory version cannot decrease from {current} to {version}"
                )));
            }

            table.insert(DIRECTORY_VERSION_KEY, version).map_err(io)?;
            Ok(())
        })
    }

    fn load_contact(&self, id: &str) -> Result<Option<ContactRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(CONTACTS).map_err(io)?;

        table.get(id).map_err(io)?.map(|v| decode(v.value())).transpose()
    }

    fn contacts(&self) -> Result<Vec<ContactRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(CONTACTS).map_err(io)?;

        let mut contacts = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            contacts.push(decode(value.value())?);
        }

        Ok(contacts)
    }

    fn replace_contact(&self, record: &ContactRecord) -> Result<(), StoreError> {
        let bytes = encode(record)?;

        self.write(|txn| {
            let mut table = txn.open_table(CONTACTS).map_err(io)?;
            table.remove(record.id.as_str()).map_err(io)?;
            table.insert(record.id.as_str(), bytes.as_slice()).map_err(io)?;
            Ok(())
        })
    }

    fn update_contact(
        &self,
        id: &str,
        fields: &ContactFields,
    ) -> Result<Option<ContactRecord>, StoreError> {
        self.write(|txn| {
            let mut table = txn.open_table(CONTACTS).map_err(io)?;

            let existing: Option<ContactRecord> =
                table.get(id).map_err(io)?.map(|v| decode(v.value())).transpose()?;
            let Some(mut record) = existing else {
                return Ok(None);
            };

            if record.merge(fields) {
                let bytes = encode(&record)?;
                table.insert(id, bytes.as_slice()).map_err(io)?;
            }

            Ok(Some(record))
        })
    }

    fn delete_contact(&self, id: &str) -> Result<bool, StoreError> {
        self.write(|txn| {
            let mut table = txn.open_table(CONTACTS).map_err(io)?;
            let removed = table.remove(id).map_err(io)?.is_some();
            Ok(removed)
        })
    }

    fn replace_directory(&self, records: &[ContactRecord]) -> Result<(), StoreError> {
        let encoded = records
            .iter()
            .map(|r| encode(r).map(|bytes| (r.id.as_str(), bytes)))
            .collect::<Result<Vec<_>, _>>()?;

        self.write(|txn| {
            let mut table = txn.open_table(CONTACTS).map_err(io)?;

            let mut existing = Vec::new();
            for entry in table.iter().map_err(io)? {
                let (key, _) = entry.map_err(io)?;
                existing.push(key.value().to_string());
            }
            for id in &existing {
                table.remove(id.as_str()).map_err(io)?;
            }

            for (id, bytes) in &encoded {
                table.insert(*id, bytes.as_slice()).map_err(io)?;
            }

            Ok(())
        })
    }
}

/// Tables touched by every message write, opened once per transaction.
struct MessageTables<'txn> {
    messages: Table<'txn, &'static str, &'static [u8]>,
    index: Table<'txn, &'static [u8], &'static str>,
    conversations: Table<'txn, &'static str, u64>,
    attachments: Table<'txn, &'static [u8], &'static [u8]>,
}

impl<'txn> MessageTables<'txn> {
    fn open(txn: &'txn WriteTransaction) -> Result<Self, StoreError> {
        Ok(Self {
            messages: txn.open_table(MESSAGES).map_err(io)?,
            index: txn.open_table(CONVERSATION_INDEX).map_err(io)?,
            conversations: txn.open_table(CONVERSATIONS).map_err(io)?,
            attachments: txn.open_table(ATTACHMENTS).map_err(io)?,
        })
    }

    fn load(&self, id: &str) -> Result<Option<MessageRecord>, StoreError> {
        self.messages.get(id).map_err(io)?.map(|v| decode(v.value())).transpose()
    }

    fn contains(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.messages.get(id).map_err(io)?.is_some())
    }

    /// Insert or overwrite `record`, keeping the index and conversation
    /// summary in step.
    fn insert(&mut self, record: &MessageRecord) -> Result<(), StoreError> {
        if let Some(previous) = self.load(&record.id)? {
            let old_key = index_key(&previous.conversation_id, previous.timestamp, &previous.id);
            self.index.remove(old_key.as_slice()).map_err(io)?;
        }

        let bytes = encode(record)?;
        self.messages.insert(record.id.as_str(), bytes.as_slice()).map_err(io)?;

        let key = index_key(&record.conversation_id, record.timestamp, &record.id);
        self.index.insert(key.as_slice(), record.id.as_str()).map_err(io)?;

        let conversation = record.conversation_id.as_str();
        let last_active = self.conversations.get(conversation).map_err(io)?.map(|v| v.value());
        let last_active = last_active.map_or(record.timestamp, |t| t.max(record.timestamp));
        self.conversations.insert(conversation, last_active).map_err(io)?;

        Ok(())
    }

    /// Remove a message with its index entry and attachments.
    fn remove(&mut self, id: &str) -> Result<bool, StoreError> {
        let Some(record) = self.load(id)? else {
            return Ok(false);
        };

        self.messages.remove(id).map_err(io)?;
        let key = index_key(&record.conversation_id, record.timestamp, &record.id);
        self.index.remove(key.as_slice()).map_err(io)?;

        let (start, end) = prefix_range(id);
        let mut attachment_keys = Vec::new();
        for entry in self.attachments.range(start.as_slice()..end.as_slice()).map_err(io)? {
            let (key, _) = entry.map_err(io)?;
            attachment_keys.push(key.value().to_vec());
        }
        for key in &attachment_keys {
            self.attachments.remove(key.as_slice()).map_err(io)?;
        }

        Ok(true)
    }
}

impl MessageStore for RedbStorage {
    fn put_when_non_exist(&self, messages: &[MessageRecord]) -> Result<usize, StoreError> {
        self.write(|txn| {
            let mut tables = MessageTables::open(txn)?;

            let mut inserted = 0;
            for message in messages {
                if !tables.contains(&message.id)? {
                    tables.insert(message)?;
                    inserted += 1;
                }
            }

            Ok(inserted)
        })
    }

    fn put_messages(&self, messages: &[MessageRecord]) -> Result<(), StoreError> {
        self.write(|txn| {
            let mut tables = MessageTables::open(txn)?;
            for message in messages {
                tables.insert(message)?;
            }
            Ok(())
        })
    }

    fn load_message(&self, id: &str) -> Result<Option<MessageRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(MESSAGES).map_err(io)?;

        table.get(id).map_err(io)?.map(|v| decode(v.value())).transpose()
    }

    fn messages_in(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let index = txn.open_table(CONVERSATION_INDEX).map_err(io)?;
        let messages = txn.open_table(MESSAGES).map_err(io)?;

        let (start, end) = prefix_range(conversation_id);
        let mut result = Vec::new();
        for entry in index.range(start.as_slice()..end.as_slice()).map_err(io)? {
            let (_, id) = entry.map_err(io)?;
            if let Some(bytes) = messages.get(id.value()).map_err(io)? {
                result.push(decode(bytes.value())?);
            }
        }

        Ok(result)
    }

    fn conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(CONVERSATIONS).map_err(io)?;

        let mut conversations = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (id, last_active_at) = entry.map_err(io)?;
            conversations.push(Conversation {
                id: id.value().to_string(),
                last_active_at: last_active_at.value(),
            });
        }
        conversations.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at).then(a.id.cmp(&b.id)));

        Ok(conversations)
    }

    fn save_pending_message(&self, pending: &PendingMessage) -> Result<(), StoreError> {
        let bytes = encode(pending)?;

        self.write(|txn| {
            let mut table = txn.open_table(PENDING).map_err(io)?;
            table.insert(pending.message_id.as_str(), bytes.as_slice()).map_err(io)?;
            Ok(())
        })
    }

    fn pending_messages(&self, limit: usize) -> Result<Vec<PendingMessage>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(PENDING).map_err(io)?;

        let mut pending: Vec<PendingMessage> = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            pending.push(decode(value.value())?);
        }
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
        self.write(|txn| {
            let mut pending = txn.open_table(PENDING).map_err(io)?;
            pending.remove(message_id).map_err(io)?;

            let mut tables = MessageTables::open(txn)?;
            if tables.contains(&record.id)? {
                return Ok(false);
            }

            tables.insert(record)?;
            Ok(true)
        })
    }

    fn discard_pending(&self, message_id: &str) -> Result<bool, StoreError> {
        self.write(|txn| {
            let mut table = txn.open_table(PENDING).map_err(io)?;
            let removed = table.remove(message_id).map_err(io)?.is_some();
            Ok(removed)
        })
    }

    fn update_send_status(
        &self,
        message: &MessageRecord,
        status: SendStatus,
    ) -> Result<SendStatus, StoreError> {
        self.write(|txn| {
            let mut tables = MessageTables::open(txn)?;

            let record = match tables.load(&message.id)? {
                Some(mut stored) => {
                    stored.send_status = check_status(&message.id, stored.send_status, status)?;
                    stored
                },
                None => message.clone().with_status(status),
            };

            tables.insert(&record)?;
            Ok(record.send_status)
        })
    }

    fn update_read_position(
        &self,
        conversation_id: &str,
        read_max_timestamp: u64,
    ) -> Result<u64, StoreError> {
        self.write(|txn| {
            let mut table = txn.open_table(READ_POSITIONS).map_err(io)?;

            let current = table.get(conversation_id).map_err(io)?.map(|v| v.value()).unwrap_or(0);
            let position = current.max(read_max_timestamp);
            table.insert(conversation_id, position).map_err(io)?;

            Ok(position)
        })
    }

    fn read_position(&self, conversation_id: &str) -> Result<Option<u64>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(READ_POSITIONS).map_err(io)?;

        Ok(table.get(conversation_id).map_err(io)?.map(|v| v.value()))
    }

    fn unread_count(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let positions = txn.open_table(READ_POSITIONS).map_err(io)?;
        let index = txn.open_table(CONVERSATION_INDEX).map_err(io)?;

        let position = positions.get(conversation_id).map_err(io)?.map(|v| v.value());

        let (start, end) = prefix_range(conversation_id);
        let mut unread = 0;
        for entry in index.range(start.as_slice()..end.as_slice()).map_err(io)? {
            let (key, _) = entry.map_err(io)?;
            let timestamp = index_timestamp(key.value(), conversation_id.len())?;
            if position.is_none_or(|p| timestamp > p) {
                unread += 1;
            }
        }

        Ok(unread)
    }

    fn delete_messages(&self, ids: &[String]) -> Result<usize, StoreError> {
        self.write(|txn| {
            let mut tables = MessageTables::open(txn)?;

            let mut deleted = 0;
            for id in ids {
                if tables.remove(id)? {
                    deleted += 1;
                }
            }

            Ok(deleted)
        })
    }

    fn remove_room_and_messages(&self, conversation_id: &str) -> Result<usize, StoreError> {
        self.write(|txn| {
            let mut tables = MessageTables::open(txn)?;

            let (start, end) = prefix_range(conversation_id);
            let mut ids = Vec::new();
            for entry in tables.index.range(start.as_slice()..end.as_slice()).map_err(io)? {
                let (_, id) = entry.map_err(io)?;
                ids.push(id.value().to_string());
            }

            for id in &ids {
                tables.remove(id)?;
            }
            tables.conversations.remove(conversation_id).map_err(io)?;

            let mut positions = txn.open_table(READ_POSITIONS).map_err(io)?;
            positions.remove(conversation_id).map_err(io)?;

            Ok(ids.len())
        })
    }

    fn update_message_reaction(
        &self,
        message_id: &str,
        reaction: &Reaction,
    ) -> Result<bool, StoreError> {
        self.modify_message(message_id, |message| message.apply_reaction(reaction))
    }

    fn update_message_translate_data(
        &self,
        message_id: &str,
        data: &TranslateData,
    ) -> Result<bool, StoreError> {
        self.modify_message(message_id, |message| {
            message.translation = Some(data.clone());
            true
        })
    }

    fn update_message_speech_to_text_data(
        &self,
        message_id: &str,
        data: &SpeechToTextData,
    ) -> Result<bool, StoreError> {
        self.modify_message(message_id, |message| {
            message.speech_to_text = Some(data.clone());
            true
        })
    }

    fn put_attachment(&self, attachment: &AttachmentRecord) -> Result<(), StoreError> {
        let bytes = encode(attachment)?;

        self.write(|txn| {
            let mut tables = MessageTables::open(txn)?;

            if !tables.contains(&attachment.message_id)? {
                return Err(StoreError::NotFound(format!("message {}", attachment.message_id)));
            }

            let key = attachment_key(&attachment.message_id, &attachment.id);
            tables.attachments.insert(key.as_slice(), bytes.as_slice()).map_err(io)?;
            Ok(())
        })
    }

    fn attachments_for(&self, message_id: &str) -> Result<Vec<AttachmentRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(ATTACHMENTS).map_err(io)?;

        let (start, end) = prefix_range(message_id);
        let mut attachments = Vec::new();
        for entry in table.range(start.as_slice()..end.as_slice()).map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            attachments.push(decode(value.value())?);
        }

        Ok(attachments)
    }
}

impl RedbStorage {
    /// Load, modify and write back one message. `false` if unknown or `f`
    /// reports no change.
    fn modify_message(
        &self,
        message_id: &str,
        f: impl FnOnce(&mut MessageRecord) -> bool,
    ) -> Result<bool, StoreError> {
        self.write(|txn| {
            let mut table = txn.open_table(MESSAGES).map_err(io)?;

            let existing: Option<MessageRecord> =
                table.get(message_id).map_err(io)?.map(|v| decode(v.value())).transpose()?;
            let Some(mut message) = existing else {
                return Ok(false);
            };

            if !f(&mut message) {
                return Ok(false);
            }

            let bytes = encode(&message)?;
            table.insert(message_id, bytes.as_slice()).map_err(io)?;
            Ok(true)
        })
    }
}

fn io<E: Display>(e: E) -> StoreError {
    StoreError::Io(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    ciborium::de::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Encode conversation index key: conversation ++ 0x00 ++ ts (BE) ++ id.
fn index_key(conversation_id: &str, timestamp: u64, message_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(conversation_id.len() + 9 + message_id.len());
    key.extend_from_slice(conversation_id.as_bytes());
    key.push(0);
    key.extend_from_slice(&timestamp.to_be_bytes());
    key.extend_from_slice(message_id.as_bytes());
    key
}

/// Extract the timestamp from an index key whose prefix is `prefix_len` bytes.
fn index_timestamp(key: &[u8], prefix_len: usize) -> Result<u64, StoreError> {
    let start = prefix_len + 1;
    key.get(start..start + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| StoreError::Serialization("truncated conversation index key".to_string()))
}

fn attachment_key(message_id: &str, attachment_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(message_id.len() + 1 + attachment_id.len());
    key.extend_from_slice(message_id.as_bytes());
    key.push(0);
    key.extend_from_slice(attachment_id.as_bytes());
    key
}

/// Half-open key range covering every `prefix ++ 0x00 ++ ...` key.
fn prefix_range(prefix: &str) -> (Vec<u8>, Vec<u8>) {
    let mut start = prefix.as_bytes().to_vec();
    start.push(0);
    let mut end = prefix.as_bytes().to_vec();
    end.push(1);
    (start, end)
}
