//! Remote mirror of the snapshot
//!
//! A remote mirror is a document store holding the same three records as the
//! local store. It is eventually consistent and may be shared by several
//! machines. Everything read from it passes through [`RemoteDocument`], which
//! validates the shape before the merge ever sees it.

pub mod file;
pub mod memory;

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::models::{RoutineTask, Snapshot, StreakState, Task};

pub use file::FileMirror;
pub use memory::MemoryMirror;

/// Streak record as stored remotely.
///
/// Every field is optional: a field missing from the remote record leaves the
/// local value alone, while a field present (even as `null`) replaces it.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStreak {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_days: Option<BTreeSet<NaiveDate>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub last_check_date: Option<Option<NaiveDate>>,
}

/// Marks a field as present even when its value is `null`.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl From<&StreakState> for RemoteStreak {
    fn from(state: &StreakState) -> Self {
        Self {
            start_date: Some(state.start_date),
            current_day: Some(state.current_day),
            completed_days: Some(state.completed_days.clone()),
            last_check_date: Some(state.last_check_date),
        }
    }
}

/// Validated remote document.
///
/// Any of the three records may be missing, which happens before the first
/// write and with the per-record layout.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<Task>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routine_tasks: Option<Vec<RoutineTask>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak_data: Option<RemoteStreak>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl RemoteDocument {
    /// Full document for `snapshot`, stamped with `now`.
    pub fn from_snapshot(snapshot: &Snapshot, now: DateTime<Utc>) -> Self {
        Self {
            tasks: Some(snapshot.tasks.clone()),
            routine_tasks: Some(snapshot.routine_tasks.clone()),
            streak_data: Some(RemoteStreak::from(&snapshot.streak)),
            last_updated: Some(now),
        }
    }

    /// Parses and validates a raw document.
    ///
    /// Documents that do not match the schema are rejected as a whole. Entries
    /// with blank text are dropped.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let mut doc: RemoteDocument = serde_json::from_slice(raw)
            .map_err(|e| Error::Remote(format!("malformed remote document: {}", e)))?;
        doc.drop_blank_entries();
        Ok(doc)
    }

    fn drop_blank_entries(&mut self) {
        if let Some(tasks) = &mut self.tasks {
            let before = tasks.len();
            tasks.retain(|t| !t.text.trim().is_empty());
            if tasks.len() != before {
                warn!(dropped = before - tasks.len(), "remote tasks with blank text ignored");
            }
        }
        if let Some(routine) = &mut self.routine_tasks {
            let before = routine.len();
            routine.retain(|r| !r.text.trim().is_empty());
            if routine.len() != before {
                warn!(dropped = before - routine.len(), "remote routine entries with blank text ignored");
            }
        }
    }

    /// Fills fields missing from `self` with those of `other`.
    pub(crate) fn absorb(&mut self, other: RemoteDocument) {
        if self.tasks.is_none() {
            self.tasks = other.tasks;
        }
        if self.routine_tasks.is_none() {
            self.routine_tasks = other.routine_tasks;
        }
        if self.streak_data.is_none() {
            self.streak_data = other.streak_data;
        }
        self.last_updated = match (self.last_updated, other.last_updated) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_none() && self.routine_tasks.is_none() && self.streak_data.is_none()
    }
}

/// Keeps a change subscription alive; dropping it stops notifications.
pub struct Subscription {
    _guard: Box<dyn Any + Send>,
}

impl Subscription {
    pub fn new(guard: impl Any + Send) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

/// A document store replica of the snapshot.
///
/// Calls are blocking; async callers go through `spawn_blocking`.
pub trait RemoteMirror: Send + Sync {
    /// Human-readable location, for status output.
    fn describe(&self) -> String;

    /// Reads the current remote document, `None` if nothing was written yet.
    fn read_snapshot(&self) -> Result<Option<RemoteDocument>>;

    /// Overwrites the remote document with `snapshot`.
    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// Delivers every subsequent remote change to `changes`.
    fn subscribe(&self, changes: mpsc::UnboundedSender<RemoteDocument>) -> Result<Subscription>;
}

/// Opens the configured mirror, or `None` when the remote is disabled.
pub fn open_mirror(config: &RemoteConfig) -> Result<Option<Arc<dyn RemoteMirror>>> {
    if !config.enabled {
        return Ok(None);
    }
    let root = config
        .root
        .as_ref()
        .ok_or_else(|| Error::InvalidConfig("remote.root is required when the remote is enabled".to_string()))?;
    let mirror = FileMirror::new(root, &config.collection, &config.document, config.layout);
    Ok(Some(Arc::new(mirror)))
}
