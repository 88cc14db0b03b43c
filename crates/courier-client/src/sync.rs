//! Directory sync worker.
//!
//! Notifications are queued by [`SyncIntake::submit`] without blocking and
//! processed by one background task every `batch_interval`. Each tick drains
//! the queue, plans it with [`plan_batch`] and executes the steps against the
//! store. The worker is the only writer of the directory version.
//!
//! # Failure handling
//!
//! - A failed member change is logged and counted; the rest of the batch still
//!   runs.
//! - A failed resync or version write aborts the tick. The notification that
//!   failed and everything after it go back to the front of the queue for the
//!   next tick, so the applied version never moves past unapplied changes.

use std::sync::Arc;

use courier_core::{BatchStep, ContactRecord, plan_batch};
use courier_proto::payloads::directory::{ContactChangeNotification, MemberAction, MemberChange};
use courier_store::{DirectoryStore, MessageStore, StoreError};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{config::SyncConfig, error::SyncError, fetcher::DirectoryFetcher};

type ResyncReply = oneshot::Sender<Result<u64, SyncError>>;

/// Outcome of one batch tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Notifications applied (including the one applied after a resync)
    pub applied: usize,
    /// Stale or superseded notifications dropped
    pub discarded: usize,
    /// Whether a full resync ran
    pub resynced: bool,
    /// Member changes whose storage write failed
    pub failed_rows: usize,
    /// Whether the tick stopped early and re-queued work
    pub aborted: bool,
}

impl TickReport {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Cloneable, non-blocking entry point for directory notifications.
#[derive(Clone)]
pub struct SyncIntake {
    tx: mpsc::UnboundedSender<ContactChangeNotification>,
}

impl SyncIntake {
    /// Queue a notification for the next tick.
    ///
    /// # Errors
    ///
    /// - `SyncError::ShutDown` if the worker has stopped
    pub fn submit(&self, notification: ContactChangeNotification) -> Result<(), SyncError> {
        self.tx.send(notification).map_err(|_| SyncError::ShutDown)
    }
}

/// Handle to the directory sync worker.
pub struct DirectorySyncEngine {
    intake: SyncIntake,
    requests: mpsc::Sender<ResyncReply>,
    version: watch::Receiver<u64>,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl DirectorySyncEngine {
    /// Spawn the worker, starting from the version persisted in `store`.
    ///
    /// # Errors
    ///
    /// - `SyncError::Storage` if the stored version cannot be read
    pub fn start<S, F>(config: SyncConfig, store: S, fetcher: Arc<F>) -> Result<Self, SyncError>
    where
        S: DirectoryStore + MessageStore,
        F: DirectoryFetcher,
    {
        let current = store.directory_version()?;

        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (requests_tx, requests_rx) = mpsc::channel(8);
        let (version_tx, version_rx) = watch::channel(current);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = SyncWorker::new(store, fetcher, intake_rx, current, version_tx);
        let handle =
            tokio::spawn(worker.run(config.batch_interval, requests_rx, shutdown_rx));

        tracing::info!(version = current, "directory sync started");

        Ok(Self {
            intake: SyncIntake { tx: intake_tx },
            requests: requests_tx,
            version: version_rx,
            shutdown: Some(shutdown_tx),
            worker: Some(handle),
        })
    }

    /// Queue a notification for the next tick.
    ///
    /// # Errors
    ///
    /// - `SyncError::ShutDown` if the worker has stopped
    pub fn submit(&self, notification: ContactChangeNotification) -> Result<(), SyncError> {
        self.intake.submit(notification)
    }

    /// Cloneable intake for producers that outlive a borrow of the engine.
    pub fn intake(&self) -> SyncIntake {
        self.intake.clone()
    }

    /// Fetch the full directory now and overwrite local state.
    ///
    /// Runs on the worker between ticks. Returns the applied version
    /// afterwards, which never decreases.
    ///
    /// # Errors
    ///
    /// - `SyncError::ResyncFailed` if the fetch failed
    /// - `SyncError::Storage` if the snapshot could not be written
    /// - `SyncError::ShutDown` if the worker has stopped
    pub async fn resync_now(&self) -> Result<u64, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(tx).await.map_err(|_| SyncError::ShutDown)?;
        rx.await.map_err(|_| SyncError::ShutDown)?
    }

    /// Last durably applied directory version.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Observe applied version changes.
    pub fn subscribe_version(&self) -> watch::Receiver<u64> {
        self.version.clone()
    }

    /// Stop the worker after its in-flight tick completes.
    ///
    /// Notifications still queued are dropped; they are redelivered or
    /// recovered by a resync on the next start.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take()
            && let Err(e) = worker.await
        {
            tracing::warn!(error = %e, "directory sync worker ended abnormally");
        }
    }
}

struct SyncWorker<S, F> {
    store: S,
    fetcher: Arc<F>,
    intake: mpsc::UnboundedReceiver<ContactChangeNotification>,
    carry: Vec<ContactChangeNotification>,
    current: u64,
    version_tx: watch::Sender<u64>,
}

impl<S, F> SyncWorker<S, F>
where
    S: DirectoryStore + MessageStore,
    F: DirectoryFetcher,
{
    fn new(
        store: S,
        fetcher: Arc<F>,
        intake: mpsc::UnboundedReceiver<ContactChangeNotification>,
        current: u64,
        version_tx: watch::Sender<u64>,
    ) -> Self {
        Self { store, fetcher, intake, carry: Vec::new(), current, version_tx }
    }

    async fn run(
        mut self,
        batch_interval: std::time::Duration,
        mut requests: mpsc::Receiver<ResyncReply>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + batch_interval, batch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                Some(reply) = requests.recv() => {
                    let _ = reply.send(self.resync_now().await);
                },
                _ = ticker.tick() => {
                    self.tick().await;
                },
            }
        }

        tracing::info!(version = self.current, "directory sync stopped");
    }

    /// Drain the queue and process one batch.
    async fn tick(&mut self) -> TickReport {
        let mut batch = std::mem::take(&mut self.carry);
        while let Ok(notification) = self.intake.try_recv() {
            batch.push(notification);
        }

        if batch.is_empty() {
            return TickReport::default();
        }

        let steps = plan_batch(self.current, batch);
        let mut report = TickReport::default();
        let mut steps = steps.into_iter();

        while let Some(step) = steps.next() {
            let outcome = match &step {
                BatchStep::Discard { notification, reason } => {
                    tracing::debug!(
                        version = notification.directory_version,
                        current = self.current,
                        ?reason,
                        "discarding directory notification"
                    );
                    report.discarded += 1;
                    continue;
                },
                BatchStep::Apply(notification) => self.apply(notification, &mut report),
                BatchStep::ResyncThenApply(notification) => {
                    tracing::info!(
                        version = notification.directory_version,
                        current = self.current,
                        "directory version gap, resyncing"
                    );
                    match self.resync().await {
                        Ok(_) => {
                            report.resynced = true;
                            self.apply(notification, &mut report)
                        },
                        Err(e) => Err(e),
                    }
                },
            };

            if let Err(e) = outcome {
                tracing::warn!(
                    version = step.version(),
                    current = self.current,
                    error = %e,
                    "directory tick aborted"
                );
                report.aborted = true;
                self.carry.push(step.into_notification());
                self.carry.extend(steps.by_ref().map(BatchStep::into_notification));
                break;
            }
        }

        if !report.is_empty() {
            tracing::debug!(
                version = self.current,
                applied = report.applied,
                discarded = report.discarded,
                resynced = report.resynced,
                failed_rows = report.failed_rows,
                aborted = report.aborted,
                "directory tick"
            );
        }

        report
    }

    /// Apply a notification's changes and advance to its version.
    fn apply(
        &mut self,
        notification: &ContactChangeNotification,
        report: &mut TickReport,
    ) -> Result<(), SyncError> {
        let version = notification.directory_version;

        for change in &notification.changes {
            if let Err(e) = self.apply_change(change) {
                tracing::warn!(
                    version,
                    member_id = %change.member_id,
                    action = ?change.action,
                    error = %e,
                    "member change failed"
                );
                report.failed_rows += 1;
            }
        }

        self.advance(version)?;
        report.applied += 1;
        Ok(())
    }

    fn apply_change(&self, change: &MemberChange) -> Result<(), StoreError> {
        match change.action {
            MemberAction::Add => {
                let record = ContactRecord::from_fields(change.member_id.clone(), &change.fields);
                self.store.replace_contact(&record)
            },
            MemberAction::Update => {
                if self.store.update_contact(&change.member_id, &change.fields)?.is_none() {
                    tracing::debug!(member_id = %change.member_id, "update for unknown member");
                }
                Ok(())
            },
            MemberAction::DeleteBySelf | MemberAction::DeleteByOther => {
                self.store.delete_contact(&change.member_id)?;
                let removed = self.store.remove_room_and_messages(&change.member_id)?;
                tracing::debug!(member_id = %change.member_id, removed, "member deleted");
                Ok(())
            },
        }
    }

    /// Overwrite the directory with a fresh snapshot. Returns its version.
    async fn resync(&mut self) -> Result<u64, SyncError> {
        let snapshot = self.fetcher.fetch_full_directory().await?;
        let records: Vec<ContactRecord> =
            snapshot.contacts.iter().map(ContactRecord::from).collect();

        self.store.replace_directory(&records)?;
        tracing::info!(
            snapshot_version = snapshot.version,
            contacts = records.len(),
            "directory resynced"
        );

        Ok(snapshot.version)
    }

    async fn resync_now(&mut self) -> Result<u64, SyncError> {
        let version = self.resync().await?;
        if version > self.current {
            self.advance(version)?;
        }
        Ok(self.current)
    }

    fn advance(&mut self, version: u64) -> Result<(), SyncError> {
        self.store.set_directory_version(version)?;
        self.current = version;
        self.version_tx.send_replace(version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use courier_core::model::MessageRecord;
    use courier_proto::payloads::directory::{ContactEntry, ContactFields, DirectorySnapshot};
    use courier_store::{ChaoticStorage, MemoryStorage};

    use super::*;

    struct FakeFetcher {
        snapshot: DirectorySnapshot,
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl FakeFetcher {
        fn new(version: u64, ids: &[&str]) -> Self {
            let contacts = ids
                .iter()
                .map(|id| ContactEntry {
                    id: (*id).to_string(),
                    fields: ContactFields {
                        name: Some(format!("snap-{id}")),
                        ..Default::default()
                    },
                })
                .collect();

            Self {
                snapshot: DirectorySnapshot { version, contacts },
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl DirectoryFetcher for FakeFetcher {
        async fn fetch_full_directory(&self) -> Result<DirectorySnapshot, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::ResyncFailed("offline".into()));
            }
            Ok(self.snapshot.clone())
        }
    }

    fn add(version: u64, id: &str, name: &str) -> ContactChangeNotification {
        change(version, id, MemberAction::Add, Some(name))
    }

    fn change(
        version: u64,
        id: &str,
        action: MemberAction,
        name: Option<&str>,
    ) -> ContactChangeNotification {
        ContactChangeNotification {
            directory_version: version,
            changes: vec![MemberChange {
                member_id: id.to_string(),
                action,
                fields: ContactFields { name: name.map(str::to_string), ..Default::default() },
            }],
        }
    }

    fn worker<S: DirectoryStore + MessageStore>(
        store: S,
        fetcher: Arc<FakeFetcher>,
        current: u64,
    ) -> (SyncWorker<S, FakeFetcher>, mpsc::UnboundedSender<ContactChangeNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (version_tx, _) = watch::channel(current);
        (SyncWorker::new(store, fetcher, rx, current, version_tx), tx)
    }

    #[tokio::test]
    async fn empty_queue_is_a_noop() {
        let store = MemoryStorage::new();
        let (mut worker, _tx) = worker(store, Arc::new(FakeFetcher::new(0, &[])), 0);

        assert_eq!(worker.tick().await, TickReport::default());
    }

    #[tokio::test]
    async fn sequential_versions_apply_in_order() {
        let store = MemoryStorage::new();
        let fetcher = Arc::new(FakeFetcher::new(0, &[]));
        let (mut worker, tx) = worker(store.clone(), Arc::clone(&fetcher), 0);

        tx.send(change(2, "a", MemberAction::Update, Some("renamed"))).unwrap();
        tx.send(add(1, "a", "alice")).unwrap();

        let report = worker.tick().await;

        assert_eq!(report.applied, 2);
        assert!(!report.resynced);
        assert_eq!(store.directory_version().unwrap(), 2);
        assert_eq!(store.load_contact("a").unwrap().unwrap().name.as_deref(), Some("renamed"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gap_resyncs_then_supersedes_rest() {
        let store = MemoryStorage::new();
        store.set_directory_version(5).unwrap();
        let fetcher = Arc::new(FakeFetcher::new(9, &["x", "y"]));
        let (mut worker, tx) = worker(store.clone(), Arc::clone(&fetcher), 5);

        tx.send(add(9, "z", "zed")).unwrap();
        tx.send(add(8, "w", "dub")).unwrap();

        let report = worker.tick().await;

        assert!(report.resynced);
        assert_eq!(report.applied, 1);
        assert_eq!(report.discarded, 1);
        assert_eq!(worker.current, 8);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        let ids: Vec<_> = store.contacts().unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["w", "x", "y"]);
    }

    #[tokio::test]
    async fn failed_resync_requeues_and_retries() {
        let store = MemoryStorage::new();
        let fetcher = Arc::new(FakeFetcher::new(4, &["a"]));
        fetcher.fail.store(true, Ordering::SeqCst);
        let (mut worker, tx) = worker(store.clone(), Arc::clone(&fetcher), 0);

        tx.send(add(3, "b", "bob")).unwrap();
        tx.send(add(4, "c", "carol")).unwrap();

        let report = worker.tick().await;
        assert!(report.aborted);
        assert_eq!(store.directory_version().unwrap(), 0);
        assert_eq!(worker.carry.len(), 2);

        fetcher.fail.store(false, Ordering::SeqCst);
        let report = worker.tick().await;

        assert!(report.resynced && !report.aborted);
        assert_eq!(store.directory_version().unwrap(), 3);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn delete_cascades_conversation() {
        let store = MemoryStorage::new();
        let (mut worker, tx) = worker(store.clone(), Arc::new(FakeFetcher::new(0, &[])), 0);

        tx.send(add(1, "a", "alice")).unwrap();
        worker.tick().await;
        store.put_messages(&[MessageRecord::text("m1", "a", "a", 10, "hi")]).unwrap();

        tx.send(change(2, "a", MemberAction::DeleteByOther, None)).unwrap();
        worker.tick().await;

        assert!(store.load_contact("a").unwrap().is_none());
        assert!(store.messages_in("a").unwrap().is_empty());
        assert_eq!(store.directory_version().unwrap(), 2);
    }

    #[tokio::test]
    async fn update_for_unknown_member_is_skipped() {
        let store = MemoryStorage::new();
        let (mut worker, tx) = worker(store.clone(), Arc::new(FakeFetcher::new(0, &[])), 0);

        tx.send(change(1, "ghost", MemberAction::Update, Some("x"))).unwrap();
        let report = worker.tick().await;

        assert_eq!(report.applied, 1);
        assert_eq!(report.failed_rows, 0);
        assert!(store.load_contact("ghost").unwrap().is_none());
        assert_eq!(store.directory_version().unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_row_does_not_block_batch() {
        let store = ChaoticStorage::new(MemoryStorage::new(), 0.0);
        store.fail_next("replace_contact");
        let (mut worker, tx) = worker(store.clone(), Arc::new(FakeFetcher::new(0, &[])), 0);

        tx.send(add(1, "a", "alice")).unwrap();
        tx.send(add(2, "b", "bob")).unwrap();
        let report = worker.tick().await;

        assert_eq!(report.applied, 2);
        assert_eq!(report.failed_rows, 1);
        assert!(!report.aborted);
        assert!(store.inner().load_contact("a").unwrap().is_none());
        assert!(store.inner().load_contact("b").unwrap().is_some());
        assert_eq!(store.inner().directory_version().unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_version_write_requeues_without_advancing() {
        let store = ChaoticStorage::new(MemoryStorage::new(), 0.0);
        store.fail_next("set_directory_version");
        let (mut worker, tx) = worker(store.clone(), Arc::new(FakeFetcher::new(0, &[])), 0);

        tx.send(add(1, "a", "alice")).unwrap();
        tx.send(add(2, "b", "bob")).unwrap();
        let report = worker.tick().await;

        assert!(report.aborted);
        assert_eq!(report.applied, 0);
        assert_eq!(worker.carry.len(), 2);
        assert_eq!(worker.current, 0);
        assert_eq!(store.inner().directory_version().unwrap(), 0);

        let report = worker.tick().await;

        assert_eq!(report.applied, 2);
        assert!(worker.carry.is_empty());
        assert_eq!(store.inner().directory_version().unwrap(), 2);
        assert_eq!(store.inner().contacts().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn chaotic_store_converges_without_skipping_versions() {
        let store = ChaoticStorage::with_seed(MemoryStorage::new(), 0.2, 7);
        let (mut worker, tx) = worker(store.clone(), Arc::new(FakeFetcher::new(0, &[])), 0);

        for version in 1..=20 {
            tx.send(add(version, &format!("m{version}"), "member")).unwrap();
        }

        let mut last = 0;
        for _ in 0..200 {
            if worker.current == 20 {
                break;
            }
            worker.tick().await;

            let persisted = store.inner().directory_version().unwrap();
            assert_eq!(persisted, worker.current);
            assert!(persisted >= last, "version went from {last} to {persisted}");
            last = persisted;
        }

        assert_eq!(worker.current, 20);
    }

    #[tokio::test]
    async fn explicit_resync_never_lowers_version() {
        let store = MemoryStorage::new();
        store.set_directory_version(12).unwrap();
        let fetcher = Arc::new(FakeFetcher::new(10, &["a"]));
        let (mut worker, _tx) = worker(store.clone(), fetcher, 12);

        assert_eq!(worker.resync_now().await.unwrap(), 12);
        assert_eq!(store.contacts().unwrap().len(), 1);
        assert_eq!(store.directory_version().unwrap(), 12);
    }
}
