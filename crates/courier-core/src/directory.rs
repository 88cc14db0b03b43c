//! Gap-aware ordering of directory notifications.
//!
//! The server bumps the directory version by one per change batch. A client
//! holding version `current` can apply `current + 1` directly. Anything
//! higher means notifications were lost, and the only safe recovery is a full
//! resync. Anything lower has already been applied.
//!
//! [`plan_batch`] turns one drained batch into an ordered list of steps. It is
//! pure; executing the steps (storage writes, network resync) is the caller's
//! job.

use courier_proto::payloads::directory::ContactChangeNotification;

/// Relationship between an incoming version and the applied version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// Exactly `current + 1`
    Next,
    /// Higher than `current + 1`; notifications were missed
    Gap {
        /// Number of versions skipped
        missing: u64,
    },
    /// Already applied (`<= current`)
    Stale,
}

/// Classify `version` against the applied `current` version.
#[must_use]
pub fn classify(current: u64, version: u64) -> VersionCheck {
    match version.checked_sub(current) {
        Some(1) => VersionCheck::Next,
        Some(0) | None => VersionCheck::Stale,
        Some(delta) => VersionCheck::Gap { missing: delta - 1 },
    }
}

/// Why a notification was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Version already applied
    Stale,
    /// A full resync earlier in the batch made it obsolete
    Superseded,
}

/// One step of a processed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStep {
    /// Apply the changes and advance to the notification's version
    Apply(ContactChangeNotification),
    /// Fetch the full directory, then apply the changes and advance
    ResyncThenApply(ContactChangeNotification),
    /// Drop without touching local state
    Discard {
        /// The dropped notification
        notification: ContactChangeNotification,
        /// Why it was dropped
        reason: DiscardReason,
    },
}

impl BatchStep {
    /// Version of the notification behind this step.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.notification().directory_version
    }

    /// Notification behind this step.
    #[must_use]
    pub fn notification(&self) -> &ContactChangeNotification {
        match self {
            Self::Apply(n) | Self::ResyncThenApply(n) => n,
            Self::Discard { notification, .. } => notification,
        }
    }

    /// Consume the step and return its notification.
    #[must_use]
    pub fn into_notification(self) -> ContactChangeNotification {
        match self {
            Self::Apply(n) | Self::ResyncThenApply(n) => n,
            Self::Discard { notification, .. } => notification,
        }
    }

    /// Whether the step mutates local state.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Discard { .. })
    }
}

/// Plan one batch against the applied version `current`.
///
/// Sorts by version (stable, so duplicates keep arrival order) and walks the
/// batch assuming every mutating step succeeds. After a resync step the rest of
/// the batch is superseded.
///
/// # Invariants
///
/// - Mutating steps appear in strictly increasing version order.
/// - At most one [`BatchStep::ResyncThenApply`] is produced and it is the last
///   mutating step.
#[must_use]
pub fn plan_batch(current: u64, mut batch: Vec<ContactChangeNotification>) -> Vec<BatchStep> {
    batch.sort_by_key(|n| n.directory_version);

    let mut steps = Vec::with_capacity(batch.len());
    let mut applied = current;
    let mut resynced = false;

    for notification in batch {
        if resynced {
            steps.push(BatchStep::Discard { notification, reason: DiscardReason::Superseded });
            continue;
        }

        match classify(applied, notification.directory_version) {
            VersionCheck::Next => {
                applied = notification.directory_version;
                steps.push(BatchStep::Apply(notification));
            },
            VersionCheck::Gap { .. } => {
                applied = notification.directory_version;
                resynced = true;
                steps.push(BatchStep::ResyncThenApply(notification));
            },
            VersionCheck::Stale => {
                steps.push(BatchStep::Discard { notification, reason: DiscardReason::Stale });
            },
        }
    }

    debug_assert!(steps.iter().filter(|s| matches!(s, BatchStep::ResyncThenApply(_))).count() <= 1);

    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(version: u64) -> ContactChangeNotification {
        ContactChangeNotification { directory_version: version, changes: vec![] }
    }

    #[test]
    fn classify_versions() {
        assert_eq!(classify(5, 6), VersionCheck::Next);
        assert_eq!(classify(5, 5), VersionCheck::Stale);
        assert_eq!(classify(5, 2), VersionCheck::Stale);
        assert_eq!(classify(5, 9), VersionCheck::Gap { missing: 3 });
        assert_eq!(classify(0, 1), VersionCheck::Next);
    }

    #[test]
    fn out_of_order_batch_is_sorted() {
        let steps = plan_batch(5, vec![n(7), n(6)]);
        assert_eq!(steps, vec![BatchStep::Apply(n(6)), BatchStep::Apply(n(7))]);
    }

    #[test]
    fn gap_resyncs_and_supersedes_rest() {
        let steps = plan_batch(5, vec![n(9), n(8), n(10)]);
        assert_eq!(steps, vec![
            BatchStep::ResyncThenApply(n(8)),
            BatchStep::Discard { notification: n(9), reason: DiscardReason::Superseded },
            BatchStep::Discard { notification: n(10), reason: DiscardReason::Superseded },
        ]);
    }

    #[test]
    fn duplicates_and_stale_are_discarded() {
        let steps = plan_batch(10, vec![n(11), n(9), n(11)]);
        assert_eq!(steps, vec![
            BatchStep::Discard { notification: n(9), reason: DiscardReason::Stale },
            BatchStep::Apply(n(11)),
            BatchStep::Discard { notification: n(11), reason: DiscardReason::Stale },
        ]);
    }

    #[test]
    fn empty_batch_plans_nothing() {
        assert!(plan_batch(3, vec![]).is_empty());
    }
}
