//! Fuzz target for directory batch planning
//!
//! # Invariants
//!
//! - Every notification comes out exactly once
//! - Mutating steps have strictly increasing versions above `current`
//! - At most one resync, and nothing mutates after it
//! - Stale versions never mutate

#![no_main]

use arbitrary::Arbitrary;
use courier_core::{plan_batch, BatchStep, DiscardReason};
use courier_proto::payloads::directory::ContactChangeNotification;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    current: u8,
    versions: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let current = u64::from(input.current);
    let batch: Vec<_> = input
        .versions
        .iter()
        .map(|v| ContactChangeNotification { directory_version: u64::from(*v), changes: vec![] })
        .collect();

    let steps = plan_batch(current, batch);
    assert_eq!(steps.len(), input.versions.len());

    let mut applied = current;
    let mut resynced = false;

    for step in &steps {
        match step {
            BatchStep::Apply(_) | BatchStep::ResyncThenApply(_) => {
                assert!(!resynced, "mutation after resync");
                assert!(step.version() > applied, "non-increasing mutation");
                if matches!(step, BatchStep::Apply(_)) {
                    assert_eq!(step.version(), applied + 1);
                } else {
                    resynced = true;
                }
                applied = step.version();
            },
            BatchStep::Discard { reason: DiscardReason::Stale, .. } => {
                assert!(step.version() <= applied);
            },
            BatchStep::Discard { reason: DiscardReason::Superseded, .. } => {
                assert!(resynced);
            },
        }
    }
});
