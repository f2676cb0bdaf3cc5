//! Plumbing between the tracker and the remote mirror
//!
//! - **Initial load**: local snapshot first, then one remote read merged into
//!   it. A failed read leaves the local snapshot in charge.
//! - **Outbox**: every local save queues the full snapshot; a single writer
//!   task coalesces the queue to the newest snapshot and writes it with
//!   retries. Writes overwrite the whole document, so a retried write is
//!   harmless.
//! - **Consumer**: remote change notifications arrive on a channel and are
//!   merged one at a time, then written to the local store only. Writing them
//!   back to the remote would echo forever.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::Tracker;
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::merge::{merge_snapshot, MergeReport};
use crate::models::Snapshot;
use crate::remote::{RemoteDocument, RemoteMirror};
use crate::storage::LocalStore;

/// Snapshot assembled at startup.
#[derive(Debug, Clone)]
pub struct InitialLoad {
    pub snapshot: Snapshot,
    /// What the remote read changed, `None` if there was nothing to merge
    pub report: Option<MergeReport>,
    /// Why the remote could not be read
    pub remote_error: Option<String>,
}

/// Loads the local snapshot and merges the remote document into it.
///
/// A merge that changed anything is written through to the local store.
pub async fn initial_load(store: &LocalStore, mirror: Option<&Arc<dyn RemoteMirror>>) -> Result<InitialLoad> {
    let mut load = InitialLoad {
        snapshot: store.load_snapshot(),
        report: None,
        remote_error: None,
    };
    let Some(mirror) = mirror else {
        return Ok(load);
    };

    let reader = Arc::clone(mirror);
    let read = tokio::task::spawn_blocking(move || reader.read_snapshot())
        .await
        .unwrap_or_else(|e| Err(Error::Remote(format!("remote read task failed: {}", e))));

    match read {
        Ok(Some(doc)) => {
            let report = merge_snapshot(&mut load.snapshot, doc);
            if !report.is_noop() {
                store.save_snapshot(&load.snapshot, Utc::now())?;
            }
            info!(?report, "remote snapshot merged on load");
            load.report = Some(report);
        }
        Ok(None) => debug!(mirror = %mirror.describe(), "remote document not written yet"),
        Err(e) => {
            warn!(error = %e, "remote load failed, using local snapshot");
            load.remote_error = Some(e.to_string());
        }
    }
    Ok(load)
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    retries: u32,
    backoff: Duration,
}

/// Outcome of the most recent remote write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WriteState {
    /// Nothing written yet
    #[default]
    Idle,
    Written,
    Failed(String),
}

/// Bounded queue of snapshots waiting for the remote writer.
pub struct Outbox {
    tx: mpsc::Sender<Snapshot>,
    writer: JoinHandle<()>,
    state: watch::Receiver<WriteState>,
}

impl Outbox {
    /// Starts the writer task. Must be called from within a Tokio runtime.
    pub fn spawn(mirror: Arc<dyn RemoteMirror>, config: &RemoteConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.outbox_capacity.max(1));
        let (status_tx, state) = watch::channel(WriteState::Idle);
        let policy = RetryPolicy {
            retries: config.write_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        };
        let writer = tokio::spawn(writer_loop(mirror, rx, policy, status_tx));
        Self { tx, writer, state }
    }

    /// Queues a snapshot without waiting. Returns `false` if it was dropped.
    ///
    /// A dropped snapshot is superseded by the next one queued, which carries
    /// the full state.
    pub fn push(&self, snapshot: Snapshot) -> bool {
        match self.tx.try_send(snapshot) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("remote outbox full, snapshot dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("remote writer stopped, snapshot dropped");
                false
            }
        }
    }

    /// Outcome of the most recent write; a success clears an earlier failure.
    pub fn write_state(&self) -> WriteState {
        self.state.borrow().clone()
    }

    /// Waits for every queued snapshot to be written. Returns the outcome of
    /// the last write.
    pub async fn flush(self) -> WriteState {
        let Outbox { tx, writer, state } = self;
        drop(tx);
        if let Err(e) = writer.await {
            warn!(error = %e, "remote writer task failed");
        }
        let result = state.borrow().clone();
        result
    }
}

async fn writer_loop(
    mirror: Arc<dyn RemoteMirror>,
    mut rx: mpsc::Receiver<Snapshot>,
    policy: RetryPolicy,
    status: watch::Sender<WriteState>,
) {
    while let Some(mut snapshot) = rx.recv().await {
        let mut coalesced = 0usize;
        while let Ok(newer) = rx.try_recv() {
            snapshot = newer;
            coalesced += 1;
        }
        if coalesced > 0 {
            debug!(coalesced, "superseded snapshots skipped");
        }
        let result = write_with_retry(&mirror, snapshot, policy).await;
        // No receiver left only means nobody asks for the status anymore.
        let _ = status.send(match result {
            Ok(()) => WriteState::Written,
            Err(e) => WriteState::Failed(e.to_string()),
        });
    }
    debug!("remote writer stopped");
}

async fn write_with_retry(mirror: &Arc<dyn RemoteMirror>, snapshot: Snapshot, policy: RetryPolicy) -> Result<()> {
    let snapshot = Arc::new(snapshot);
    let mut attempt = 0u32;
    loop {
        let writer = Arc::clone(mirror);
        let pending = Arc::clone(&snapshot);
        let result = tokio::task::spawn_blocking(move || writer.write_snapshot(&pending))
            .await
            .unwrap_or_else(|e| Err(Error::Remote(format!("remote write task failed: {}", e))));

        match result {
            Ok(()) => {
                debug!(attempt, "remote snapshot written");
                return Ok(());
            }
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                warn!(attempt, error = %e, "remote write failed, retrying");
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            Err(e) => {
                warn!(error = %e, "remote write failed, giving up until the next save");
                return Err(e);
            }
        }
    }
}

/// Merges remote changes into the tracker until `shutdown` fires or the
/// subscription closes. Returns how many changes were applied.
pub async fn consume_remote_changes<F>(
    tracker: Arc<Mutex<Tracker>>,
    mut changes: mpsc::UnboundedReceiver<RemoteDocument>,
    shutdown: CancellationToken,
    mut on_merge: F,
) -> usize
where
    F: FnMut(&MergeReport),
{
    let mut applied = 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("remote consumer shutting down");
                break;
            }
            change = changes.recv() => {
                let Some(doc) = change else {
                    debug!("remote subscription closed");
                    break;
                };
                let mut tracker = tracker.lock().await;
                match tracker.apply_remote(doc) {
                    Ok(report) => {
                        applied += 1;
                        if !report.is_noop() {
                            info!(?report, "remote change merged");
                        }
                        on_merge(&report);
                    }
                    Err(e) => warn!(error = %e, "failed to apply remote change"),
                }
            }
        }
    }
    applied
}
