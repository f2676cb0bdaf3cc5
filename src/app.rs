use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::config::{Config, RemoteConfig};
use crate::error::Result;
use crate::merge::{merge_snapshot, MergeReport};
use crate::models::{Snapshot, TaskId};
use crate::remote::{self, RemoteDocument, RemoteMirror};
use crate::storage::{LocalStore, SaveReceipt};
use crate::streak;
use crate::sync::{initial_load, Outbox, WriteState};
use crate::tasks::{self, ToggleOutcome};
use crate::transfer::{self, ImportedData};

/// Health of the remote mirror as seen by this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// No remote configured
    LocalOnly,
    /// Remote reachable
    Connected(String),
    /// Remote failing; changes are kept locally
    Degraded(String),
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::LocalOnly => write!(f, "local only"),
            SyncStatus::Connected(location) => write!(f, "synced with {}", location),
            SyncStatus::Degraded(reason) => write!(f, "sync degraded: {}", reason),
        }
    }
}

/// Owns the application state and everything that persists it.
///
/// Every mutation goes through the tracker, which saves to the local store and
/// queues the snapshot for the remote mirror.
pub struct Tracker {
    snapshot: Snapshot,
    store: LocalStore,
    mirror: Option<Arc<dyn RemoteMirror>>,
    outbox: Option<Outbox>,
    load_error: Option<String>,
    load_report: Option<MergeReport>,
}

impl Tracker {
    /// Local-only tracker over an already loaded snapshot.
    pub fn new(store: LocalStore, snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            store,
            mirror: None,
            outbox: None,
            load_error: None,
            load_report: None,
        }
    }

    /// Opens the tracker described by `config`.
    pub async fn open(config: &Config, today: NaiveDate) -> Result<Self> {
        let store = LocalStore::open(config)?;
        let mirror = remote::open_mirror(&config.remote)?;
        Self::open_with(store, mirror, &config.remote, today).await
    }

    /// Loads the local snapshot, merges the remote one, and brings the streak
    /// up to date with `today`.
    pub async fn open_with(
        store: LocalStore,
        mirror: Option<Arc<dyn RemoteMirror>>,
        remote_config: &RemoteConfig,
        today: NaiveDate,
    ) -> Result<Self> {
        let load = initial_load(&store, mirror.as_ref()).await?;
        let mut snapshot = load.snapshot;
        streak::reconcile_on_load(&mut snapshot.streak, today);

        let outbox = mirror
            .as_ref()
            .map(|m| Outbox::spawn(Arc::clone(m), remote_config));
        debug!(tasks = snapshot.tasks.len(), remote = mirror.is_some(), "tracker opened");
        Ok(Self {
            snapshot,
            store,
            mirror,
            outbox,
            load_error: load.remote_error,
            load_report: load.report,
        })
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn mirror(&self) -> Option<&Arc<dyn RemoteMirror>> {
        self.mirror.as_ref()
    }

    /// What the remote merge at startup changed.
    pub fn load_report(&self) -> Option<MergeReport> {
        self.load_report
    }

    pub fn status(&self) -> SyncStatus {
        let Some(mirror) = &self.mirror else {
            return SyncStatus::LocalOnly;
        };
        // A write outcome is newer than the load error.
        let write = self.outbox.as_ref().map(Outbox::write_state).unwrap_or_default();
        let error = match write {
            WriteState::Failed(reason) => Some(reason),
            WriteState::Written => None,
            WriteState::Idle => self.load_error.clone(),
        };
        match error {
            Some(reason) => SyncStatus::Degraded(reason),
            None => SyncStatus::Connected(mirror.describe()),
        }
    }

    /// Saves locally and queues the snapshot for the remote mirror.
    pub fn save(&mut self) -> Result<SaveReceipt> {
        let receipt = self.store.save_snapshot(&self.snapshot, Utc::now())?;
        if let Some(outbox) = &self.outbox {
            outbox.push(self.snapshot.clone());
        }
        Ok(receipt)
    }

    pub fn add_task(&mut self, text: &str, date: Option<NaiveDate>, time: Option<&str>, today: NaiveDate) -> Result<TaskId> {
        let id = tasks::add(&mut self.snapshot, text, date, time, today)?;
        self.save()?;
        Ok(id)
    }

    /// Deletes a task; deleting an unknown id changes nothing.
    pub fn delete_task(&mut self, id: TaskId) -> Result<bool> {
        let removed = tasks::delete(&mut self.snapshot, id);
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn toggle_task(&mut self, id: TaskId, today: NaiveDate) -> Result<ToggleOutcome> {
        let outcome = tasks::toggle_completion(&mut self.snapshot, id, today)?;
        self.save()?;
        Ok(outcome)
    }

    pub fn apply_routine(&mut self, day: NaiveDate) -> Result<usize> {
        let added = tasks::apply_routine_to_day(&mut self.snapshot, day);
        if added > 0 {
            self.save()?;
        }
        Ok(added)
    }

    pub fn add_routine(&mut self, text: &str, time: Option<&str>) -> Result<TaskId> {
        let id = tasks::add_routine(&mut self.snapshot, text, time)?;
        self.save()?;
        Ok(id)
    }

    pub fn delete_routine(&mut self, id: TaskId) -> Result<bool> {
        let removed = tasks::delete_routine(&mut self.snapshot, id);
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn clear_routine(&mut self) -> Result<usize> {
        let removed = tasks::clear_routine(&mut self.snapshot);
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    /// Replaces the state with imported data.
    pub fn import(&mut self, imported: ImportedData) -> Result<()> {
        transfer::apply_import(&mut self.snapshot, imported);
        self.save()?;
        info!(tasks = self.snapshot.tasks.len(), "data imported");
        Ok(())
    }

    /// Replaces the state with the latest backup copies. Returns `false` if no
    /// backup was ever taken.
    pub fn restore_backup(&mut self) -> Result<bool> {
        let Some(mut backup) = self.store.load_backup() else {
            return Ok(false);
        };
        streak::recompute(&mut backup.streak);
        self.snapshot = backup;
        self.save()?;
        Ok(true)
    }

    /// Merges a remote change. The result is written to the local store only.
    pub fn apply_remote(&mut self, doc: RemoteDocument) -> Result<MergeReport> {
        let report = merge_snapshot(&mut self.snapshot, doc);
        if !report.is_noop() {
            self.store.save_snapshot(&self.snapshot, Utc::now())?;
        }
        Ok(report)
    }

    /// Waits for pending remote writes. Returns the sync status afterwards.
    pub async fn shutdown(mut self) -> SyncStatus {
        if let Some(outbox) = self.outbox.take() {
            match outbox.flush().await {
                WriteState::Failed(e) => {
                    warn!(error = %e, "last remote write failed; local data is saved");
                    self.load_error = Some(e);
                }
                WriteState::Written => self.load_error = None,
                WriteState::Idle => {}
            }
        }
        self.status()
    }
}
