//! Full directory fetch.
//!
//! [`TransportFetcher`] sends `FetchDirectory` with a fresh request id and
//! parks a oneshot until the dispatcher hands it the `DirectorySnapshot`
//! carrying the same id.

#![allow(clippy::disallowed_types, reason = "Pending map lock is never held across an await")]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use courier_proto::{FrameHeader, Opcode, Payload, payloads::directory::DirectorySnapshot};
use tokio::sync::oneshot;

use crate::{error::SyncError, transport::Transport};

/// Source of full directory snapshots.
#[async_trait]
pub trait DirectoryFetcher: Send + Sync + 'static {
    /// Fetch the complete directory from the server.
    ///
    /// # Errors
    ///
    /// - `SyncError::ResyncFailed` if the request could not be sent or no
    ///   snapshot arrived in time
    async fn fetch_full_directory(&self) -> Result<DirectorySnapshot, SyncError>;
}

type PendingFetches = HashMap<u32, oneshot::Sender<DirectorySnapshot>>;

/// [`DirectoryFetcher`] that asks the server over a [`Transport`].
pub struct TransportFetcher<T> {
    transport: Arc<T>,
    pending: Mutex<PendingFetches>,
    next_request_id: AtomicU32,
    timeout: Duration,
}

impl<T: Transport> TransportFetcher<T> {
    /// Fetcher giving up on a snapshot after `timeout`.
    pub fn new(transport: Arc<T>, timeout: Duration) -> Self {
        Self {
            transport,
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU32::new(1),
            timeout,
        }
    }

    /// Complete the fetch waiting on `request_id`.
    ///
    /// Returns `false` for unsolicited or late snapshots.
    pub fn handle_snapshot(&self, request_id: u32, snapshot: DirectorySnapshot) -> bool {
        let waiter = self.pending().remove(&request_id);

        match waiter {
            Some(tx) => tx.send(snapshot).is_ok(),
            None => {
                tracing::debug!(request_id, "unsolicited directory snapshot");
                false
            },
        }
    }

    /// Fetches still waiting for a snapshot.
    pub fn in_flight(&self) -> usize {
        self.pending().len()
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, PendingFetches> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_request_id(&self) -> u32 {
        // Zero means "uncorrelated" on the wire
        loop {
            let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    async fn request(&self, request_id: u32) -> Result<DirectorySnapshot, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.pending().insert(request_id, tx);

        let header = FrameHeader::new(Opcode::FetchDirectory).with_request_id(request_id);
        let frame = Payload::FetchDirectory
            .into_frame(header)
            .map_err(|e| SyncError::ResyncFailed(e.to_string()))?;

        self.transport
            .send(frame)
            .await
            .map_err(|e| SyncError::ResyncFailed(format!("fetch request not sent: {e}")))?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(snapshot)) => Ok(snapshot),
            Ok(Err(_)) => Err(SyncError::ResyncFailed("fetch abandoned".to_string())),
            Err(_) => Err(SyncError::ResyncFailed(format!(
                "no directory snapshot within {:?}",
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl<T: Transport> DirectoryFetcher for TransportFetcher<T> {
    async fn fetch_full_directory(&self) -> Result<DirectorySnapshot, SyncError> {
        let request_id = self.allocate_request_id();
        tracing::debug!(request_id, "fetching full directory");

        let result = self.request(request_id).await;
        if result.is_err() {
            self.pending().remove(&request_id);
        }
        result
    }
}
