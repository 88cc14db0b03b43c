//! Property tests for the directory batch planner
//!
//! Whatever order notifications arrive in, the plan must apply versions in
//! increasing order, resync at most once, and never touch versions that were
//! already applied.

use courier_core::{BatchStep, DiscardReason, plan_batch};
use courier_proto::payloads::directory::ContactChangeNotification;
use proptest::prelude::*;

fn notification(version: u64) -> ContactChangeNotification {
    ContactChangeNotification { directory_version: version, changes: vec![] }
}

/// Replays a plan the way the sync worker does and returns the final version.
fn replay(current: u64, steps: &[BatchStep]) -> u64 {
    steps
        .iter()
        .filter(|s| s.is_mutation())
        .map(BatchStep::version)
        .fold(current, |applied, version| {
            assert!(version > applied, "mutation at {version} after {applied}");
            version
        })
}

#[test]
fn prop_every_notification_gets_one_step() {
    proptest!(|(current in 0u64..50, versions in prop::collection::vec(0u64..80, 0..30))| {
        let steps = plan_batch(current, versions.iter().copied().map(notification).collect());
        prop_assert_eq!(steps.len(), versions.len());
    });
}

#[test]
fn prop_mutations_strictly_increase() {
    proptest!(|(current in 0u64..50, versions in prop::collection::vec(0u64..80, 0..30))| {
        let steps = plan_batch(current, versions.into_iter().map(notification).collect());
        let final_version = replay(current, &steps);
        prop_assert!(final_version >= current);
    });
}

#[test]
fn prop_at_most_one_resync_and_it_ends_the_batch() {
    proptest!(|(current in 0u64..50, versions in prop::collection::vec(0u64..80, 0..30))| {
        let steps = plan_batch(current, versions.into_iter().map(notification).collect());

        let resync_at = steps.iter().position(|s| matches!(s, BatchStep::ResyncThenApply(_)));
        if let Some(idx) = resync_at {
            for later in &steps[idx + 1..] {
                let is_superseded = matches!(
                    later,
                    BatchStep::Discard { reason: DiscardReason::Superseded, .. }
                );
                prop_assert!(is_superseded);
            }
        }
    });
}

#[test]
fn prop_stale_versions_never_mutate() {
    proptest!(|(current in 10u64..50, versions in prop::collection::vec(0u64..10, 1..20))| {
        let steps = plan_batch(current, versions.into_iter().map(notification).collect());
        prop_assert!(steps.iter().all(|s| !s.is_mutation()));
    });
}

#[test]
fn prop_contiguous_run_applies_without_resync() {
    proptest!(|(current in 0u64..1000, len in 1u64..20, seed in any::<u64>())| {
        let mut versions: Vec<u64> = (current + 1..=current + len).collect();
        // Deterministic shuffle
        let n = versions.len();
        for i in 0..n {
            let j = ((seed.wrapping_mul(i as u64 + 1)) % n as u64) as usize;
            versions.swap(i, j);
        }

        let steps = plan_batch(current, versions.into_iter().map(notification).collect());
        prop_assert!(steps.iter().all(|s| matches!(s, BatchStep::Apply(_))));
        prop_assert_eq!(replay(current, &steps), current + len);
    });
}
