//! Chaos property tests for storage implementations
//!
//! Wrapped in `ChaoticStorage`, every operation either fully happens or does
//! not happen at all:
//! - the directory version only moves forward
//! - a failed insert leaves no trace; a successful one is readable
//! - read positions never regress

use courier_core::model::MessageRecord;
use courier_store::{ChaoticStorage, DirectoryStore, MemoryStorage, MessageStore, RedbStorage};
use proptest::prelude::*;
use tempfile::tempdir;

#[test]
fn prop_directory_version_monotonic_under_chaos() {
    proptest!(|(
        failure_rate in 0.0..0.8,
        seed in any::<u64>(),
        versions in prop::collection::vec(0u64..50, 1..40),
    )| {
        let storage = ChaoticStorage::with_seed(MemoryStorage::new(), failure_rate, seed);

        let mut highest = 0;
        for version in versions {
            if storage.set_directory_version(version).is_ok() {
                prop_assert!(version >= highest);
                highest = version;
            }
        }

        prop_assert_eq!(storage.inner().directory_version().unwrap(), highest);
    });
}

#[test]
fn prop_message_inserts_are_atomic() {
    proptest!(|(
        failure_rate in 0.0..0.8,
        seed in any::<u64>(),
        count in 1usize..40,
    )| {
        let storage = ChaoticStorage::with_seed(MemoryStorage::new(), failure_rate, seed);

        let mut stored = Vec::new();
        for i in 0..count {
            let message = MessageRecord::text(format!("m{i}"), "room", "s", i as u64, "x");
            match storage.put_when_non_exist(std::slice::from_ref(&message)) {
                Ok(1) => stored.push(message.id),
                Ok(n) => prop_assert!(false, "unexpected insert count {}", n),
                Err(_) => {
                    prop_assert!(storage.inner().load_message(&message.id).unwrap().is_none());
                },
            }
        }

        let ids: Vec<_> =
            storage.inner().messages_in("room").unwrap().into_iter().map(|m| m.id).collect();
        prop_assert_eq!(ids, stored);
    });
}

#[test]
fn prop_read_position_monotonic_under_chaos() {
    proptest!(|(
        failure_rate in 0.0..0.8,
        seed in any::<u64>(),
        reads in prop::collection::vec(0u64..1_000, 1..40),
    )| {
        let storage = ChaoticStorage::with_seed(MemoryStorage::new(), failure_rate, seed);

        let mut position = None::<u64>;
        for read in reads {
            if let Ok(stored) = storage.update_read_position("room", read) {
                let expected = position.map_or(read, |p| p.max(read));
                prop_assert_eq!(stored, expected);
                position = Some(stored);
            }
        }

        prop_assert_eq!(storage.inner().read_position("room").unwrap(), position);
    });
}

#[test]
fn chaos_over_redb_keeps_committed_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("chaos.redb");
    let storage = ChaoticStorage::with_seed(RedbStorage::open(&path).unwrap(), 0.3, 99);

    let mut applied = 0;
    for version in 1..=50 {
        if storage.set_directory_version(version).is_ok() {
            applied = version;
        }
    }
    drop(storage);

    let reopened = RedbStorage::open(&path).unwrap();
    assert_eq!(reopened.directory_version().unwrap(), applied);
}
