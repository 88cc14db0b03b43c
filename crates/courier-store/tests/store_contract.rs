//! Behavior shared by every storage backend.
//!
//! Each check is written once against the traits and run for both
//! `MemoryStorage` and `RedbStorage`.

use courier_core::model::{
    AttachmentRecord, ContactRecord, MessageRecord, PendingMessage, Reaction, SendStatus,
    SpeechToTextData, TranslateData,
};
use courier_proto::payloads::directory::ContactFields;
use courier_store::{DirectoryStore, MessageStore, RedbStorage, StoreError};
use tempfile::{TempDir, tempdir};

fn redb() -> (TempDir, RedbStorage) {
    let dir = tempdir().unwrap();
    let storage = RedbStorage::open(dir.path().join("courier.redb")).unwrap();
    (dir, storage)
}

fn contact(id: &str, name: &str) -> ContactRecord {
    ContactRecord::from_fields(id, &ContactFields {
        name: Some(name.to_string()),
        ..Default::default()
    })
}

fn attachment(id: &str, message_id: &str) -> AttachmentRecord {
    AttachmentRecord {
        id: id.to_string(),
        message_id: message_id.to_string(),
        content_type: "image/png".to_string(),
        size: 1024,
        remote_ref: Some(format!("blob-{id}")),
        digest: None,
    }
}

fn directory_version_is_monotonic(storage: &impl DirectoryStore) {
    assert_eq!(storage.directory_version().unwrap(), 0);

    storage.set_directory_version(5).unwrap();
    storage.set_directory_version(5).unwrap();
    assert!(matches!(storage.set_directory_version(4), Err(StoreError::Conflict(_))));

    assert_eq!(storage.directory_version().unwrap(), 5);
}

fn contact_lifecycle(storage: &impl DirectoryStore) {
    storage.replace_contact(&contact("b", "Bob")).unwrap();
    storage.replace_contact(&contact("a", "Ann")).unwrap();
    storage.replace_contact(&contact("a", "Anne")).unwrap();

    let ids: Vec<_> = storage.contacts().unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(storage.load_contact("a").unwrap().unwrap().name.as_deref(), Some("Anne"));

    let avatar = ContactFields { avatar_ref: Some("img".into()), ..Default::default() };
    let merged = storage
        .update_contact("a", &avatar)
        .unwrap()
        .unwrap();
    assert_eq!(merged.name.as_deref(), Some("Anne"));
    assert_eq!(merged.avatar_ref.as_deref(), Some("img"));

    assert_eq!(storage.update_contact("ghost", &ContactFields::default()).unwrap(), None);
    assert!(storage.load_contact("ghost").unwrap().is_none());

    assert!(storage.delete_contact("b").unwrap());
    assert!(!storage.delete_contact("b").unwrap());
}

fn replace_directory_swaps_everything(storage: &impl DirectoryStore) {
    storage.replace_contact(&contact("old", "Old")).unwrap();

    storage.replace_directory(&[contact("x", "X"), contact("y", "Y")]).unwrap();

    let ids: Vec<_> = storage.contacts().unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["x", "y"]);
}

fn put_when_non_exist_deduplicates<S: MessageStore>(storage: &S) {
    let first = MessageRecord::text("m1", "room", "alice", 10, "hello");
    let replay = MessageRecord::text("m1", "room", "alice", 10, "tampered");
    let second = MessageRecord::text("m2", "room", "alice", 5, "earlier");

    assert_eq!(storage.put_when_non_exist(&[first.clone(), second]).unwrap(), 2);
    assert_eq!(storage.put_when_non_exist(&[replay]).unwrap(), 0);

    assert_eq!(storage.load_message("m1").unwrap(), Some(first));

    let ids: Vec<_> = storage.messages_in("room").unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["m2", "m1"]);
}

fn conversations_track_latest_activity<S: MessageStore>(storage: &S) {
    storage
        .put_messages(&[
            MessageRecord::text("1", "quiet", "s", 100, "a"),
            MessageRecord::text("2", "busy", "s", 50, "b"),
            MessageRecord::text("3", "busy", "s", 200, "c"),
            MessageRecord::text("4", "quiet", "s", 20, "d"),
        ])
        .unwrap();

    let conversations = storage.conversations().unwrap();
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[0].id, "busy");
    assert_eq!(conversations[0].last_active_at, 200);
    assert_eq!(conversations[1].last_active_at, 100);
}

fn read_position_never_regresses<S: MessageStore>(storage: &S) {
    storage
        .put_messages(&[
            MessageRecord::text("1", "room", "s", 10, "a"),
            MessageRecord::text("2", "room", "s", 20, "b"),
            MessageRecord::text("3", "room", "s", 30, "c"),
        ])
        .unwrap();

    assert_eq!(storage.read_position("room").unwrap(), None);
    assert_eq!(storage.unread_count("room").unwrap(), 3);

    assert_eq!(storage.update_read_position("room", 20).unwrap(), 20);
    assert_eq!(storage.update_read_position("room", 15).unwrap(), 20);

    assert_eq!(storage.read_position("room").unwrap(), Some(20));
    assert_eq!(storage.unread_count("room").unwrap(), 1);
}

fn send_status_follows_graph<S: MessageStore>(storage: &S) {
    let message = MessageRecord::text("m", "room", "me", 1, "hi");

    for status in [SendStatus::Pending, SendStatus::Sent, SendStatus::Delivered] {
        assert_eq!(storage.update_send_status(&message, status).unwrap(), status);
    }

    let regressed = storage.update_send_status(&message, SendStatus::Sent);
    assert!(matches!(regressed, Err(StoreError::Conflict(_))));

    let stored = storage.load_message("m").unwrap().unwrap();
    assert_eq!(stored.send_status, SendStatus::Delivered);
}

fn pending_envelopes_promote_once<S: MessageStore>(storage: &S) {
    for (id, ts) in [("late", 30), ("early", 10), ("mid", 20)] {
        storage
            .save_pending_message(&PendingMessage {
                message_id: id.to_string(),
                original_timestamp: ts,
                raw_envelope: vec![1, 2, 3],
            })
            .unwrap();
    }

    let ids: Vec<_> =
        storage.pending_messages(2).unwrap().into_iter().map(|p| p.message_id).collect();
    assert_eq!(ids, vec!["early", "mid"]);

    let record = MessageRecord::text("early", "room", "s", 10, "decrypted");
    assert!(storage.promote_pending("early", &record).unwrap());
    assert!(!storage.promote_pending("early", &record).unwrap());

    assert!(storage.discard_pending("mid").unwrap());
    assert!(!storage.discard_pending("mid").unwrap());

    let ids: Vec<_> =
        storage.pending_messages(10).unwrap().into_iter().map(|p| p.message_id).collect();
    assert_eq!(ids, vec!["late"]);
}

fn removing_room_cascades<S: MessageStore>(storage: &S) {
    storage
        .put_messages(&[
            MessageRecord::text("1", "gone", "s", 10, "a"),
            MessageRecord::text("2", "gone", "s", 20, "b"),
            MessageRecord::text("3", "kept", "s", 30, "c"),
        ])
        .unwrap();
    storage.put_attachment(&attachment("att", "1")).unwrap();
    storage.update_read_position("gone", 10).unwrap();

    assert_eq!(storage.remove_room_and_messages("gone").unwrap(), 2);

    assert!(storage.messages_in("gone").unwrap().is_empty());
    assert!(storage.load_message("1").unwrap().is_none());
    assert!(storage.attachments_for("1").unwrap().is_empty());
    assert_eq!(storage.read_position("gone").unwrap(), None);

    let ids: Vec<_> = storage.conversations().unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["kept"]);
}

fn delete_messages_counts_existing<S: MessageStore>(storage: &S) {
    storage.put_messages(&[MessageRecord::text("1", "room", "s", 10, "a")]).unwrap();
    storage.put_attachment(&attachment("b", "1")).unwrap();
    storage.put_attachment(&attachment("a", "1")).unwrap();

    let ids: Vec<_> = storage.attachments_for("1").unwrap().into_iter().map(|a| a.id).collect();
    assert_eq!(ids, vec!["a", "b"]);

    assert_eq!(storage.delete_messages(&["1".to_string(), "nope".to_string()]).unwrap(), 1);
    assert!(storage.attachments_for("1").unwrap().is_empty());

    let orphan = storage.put_attachment(&attachment("c", "1"));
    assert!(matches!(orphan, Err(StoreError::NotFound(_))));
}

fn annotations_apply_to_known_messages<S: MessageStore>(storage: &S) {
    storage.put_messages(&[MessageRecord::text("m", "room", "s", 10, "hola")]).unwrap();

    let like = Reaction {
        emoji: "👍".to_string(),
        author_id: "bob".to_string(),
        origin_timestamp: 50,
        removed: false,
    };
    let stale_removal = Reaction { origin_timestamp: 40, removed: true, ..like.clone() };

    assert!(storage.update_message_reaction("m", &like).unwrap());
    assert!(!storage.update_message_reaction("m", &stale_removal).unwrap());
    assert!(!storage.update_message_reaction("ghost", &like).unwrap());

    let translation = TranslateData { language: "en".to_string(), text: "hello".to_string() };
    assert!(storage.update_message_translate_data("m", &translation).unwrap());
    assert!(!storage.update_message_translate_data("ghost", &translation).unwrap());

    let transcript = SpeechToTextData { text: "hola".to_string(), complete: true };
    assert!(storage.update_message_speech_to_text_data("m", &transcript).unwrap());

    let stored = storage.load_message("m").unwrap().unwrap();
    assert_eq!(stored.reactions, vec![like]);
    assert_eq!(stored.translation, Some(translation));
    assert_eq!(stored.speech_to_text, Some(transcript));
}

macro_rules! contract_tests {
    ($($name:ident),* $(,)?) => {
        mod memory {
            use courier_store::MemoryStorage;

            $(
                #[test]
                fn $name() {
                    super::$name(&MemoryStorage::new());
                }
            )*
        }

        mod redb {
            $(
                #[test]
                fn $name() {
                    let (_dir, storage) = super::redb();
                    super::$name(&storage);
                }
            )*
        }
    };
}

contract_tests!(
    directory_version_is_monotonic,
    contact_lifecycle,
    replace_directory_swaps_everything,
    put_when_non_exist_deduplicates,
    conversations_track_latest_activity,
    read_position_never_regresses,
    send_status_follows_graph,
    pending_envelopes_promote_once,
    removing_room_cascades,
    delete_messages_counts_existing,
    annotations_apply_to_known_messages,
);

#[test]
fn redb_state_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("courier.redb");

    {
        let storage = RedbStorage::open(&path).unwrap();
        storage.replace_directory(&[contact("a", "Ann")]).unwrap();
        storage.set_directory_version(7).unwrap();
        storage.put_messages(&[MessageRecord::text("m", "a", "a", 10, "hi")]).unwrap();
        storage.update_read_position("a", 10).unwrap();
    }

    {
        let storage = RedbStorage::open(&path).unwrap();
        assert_eq!(storage.directory_version().unwrap(), 7);
        assert_eq!(storage.contacts().unwrap(), vec![contact("a", "Ann")]);
        assert_eq!(storage.messages_in("a").unwrap().len(), 1);
        assert_eq!(storage.read_position("a").unwrap(), Some(10));
        assert_eq!(storage.unread_count("a").unwrap(), 0);
    }
}
