//! Directory-backed document store.
//!
//! Documents live under `<root>/<collection>/`. Pointing `root` at a folder
//! shared between machines (network mount, synced directory) turns it into a
//! remote mirror. Changes made by any writer are picked up through `notify`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{RemoteDocument, RemoteMirror, RemoteStreak, Subscription};
use crate::config::DocumentLayout;
use crate::error::{Error, Result};
use crate::models::Snapshot;
use crate::storage::{write_atomic, StoreLock, LOCK_TIMEOUT_MS};

/// Document store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileMirror {
    collection_dir: PathBuf,
    document: String,
    layout: DocumentLayout,
}

impl FileMirror {
    pub fn new(root: &Path, collection: &str, document: &str, layout: DocumentLayout) -> Self {
        Self {
            collection_dir: root.join(collection),
            document: document.to_string(),
            layout,
        }
    }

    /// Files making up the document for the configured layout.
    pub fn document_paths(&self) -> Vec<PathBuf> {
        match self.layout {
            DocumentLayout::Combined => vec![self.collection_dir.join(format!("{}.json", self.document))],
            DocumentLayout::PerRecord => ["tasks", "streak", "routine"]
                .iter()
                .map(|record| {
                    self.collection_dir
                        .join(format!("{}-{}.json", self.document, record))
                })
                .collect(),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.collection_dir.join(format!(".{}.lock", self.document))
    }

    fn is_document_path(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        self.document_paths()
            .iter()
            .any(|p| p.file_name() == Some(name))
    }

    fn read_file(path: &Path) -> Result<Option<RemoteDocument>> {
        match fs::read(path) {
            Ok(raw) => RemoteDocument::parse(&raw).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Remote(format!("failed to read {}: {}", path.display(), e))),
        }
    }

    fn write_file(path: &Path, doc: &RemoteDocument) -> Result<()> {
        let raw = serde_json::to_vec_pretty(doc)?;
        write_atomic(path, &raw)
            .map_err(|e| Error::Remote(format!("failed to write {}: {}", path.display(), e)))
    }
}

impl RemoteMirror for FileMirror {
    fn describe(&self) -> String {
        format!("{}/{}", self.collection_dir.display(), self.document)
    }

    fn read_snapshot(&self) -> Result<Option<RemoteDocument>> {
        let mut combined: Option<RemoteDocument> = None;
        for path in self.document_paths() {
            if let Some(doc) = Self::read_file(&path)? {
                match &mut combined {
                    Some(acc) => acc.absorb(doc),
                    None => combined = Some(doc),
                }
            }
        }
        Ok(combined.filter(|doc| !doc.is_empty()))
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        fs::create_dir_all(&self.collection_dir)
            .map_err(|e| Error::Remote(format!("failed to create {}: {}", self.collection_dir.display(), e)))?;
        let _lock = StoreLock::acquire(&self.lock_path(), LOCK_TIMEOUT_MS)?;
        let now = Utc::now();

        match self.layout {
            DocumentLayout::Combined => {
                let doc = RemoteDocument::from_snapshot(snapshot, now);
                Self::write_file(&self.document_paths()[0], &doc)?;
            }
            DocumentLayout::PerRecord => {
                let paths = self.document_paths();
                let records = [
                    RemoteDocument {
                        tasks: Some(snapshot.tasks.clone()),
                        last_updated: Some(now),
                        ..Default::default()
                    },
                    RemoteDocument {
                        streak_data: Some(RemoteStreak::from(&snapshot.streak)),
                        last_updated: Some(now),
                        ..Default::default()
                    },
                    RemoteDocument {
                        routine_tasks: Some(snapshot.routine_tasks.clone()),
                        last_updated: Some(now),
                        ..Default::default()
                    },
                ];
                for (path, doc) in paths.iter().zip(records.iter()) {
                    Self::write_file(path, doc)?;
                }
            }
        }
        debug!(mirror = %self.describe(), "remote document written");
        Ok(())
    }

    fn subscribe(&self, changes: mpsc::UnboundedSender<RemoteDocument>) -> Result<Subscription> {
        fs::create_dir_all(&self.collection_dir)
            .map_err(|e| Error::Remote(format!("failed to create {}: {}", self.collection_dir.display(), e)))?;

        let mirror = self.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "remote watch error");
                    return;
                }
            };
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            if !event.paths.iter().any(|p| mirror.is_document_path(p)) {
                return;
            }
            match mirror.read_snapshot() {
                Ok(Some(doc)) => {
                    // Receiver gone means the consumer shut down.
                    let _ = changes.send(doc);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to read changed remote document"),
            }
        })?;
        watcher.watch(&self.collection_dir, RecursiveMode::NonRecursive)?;
        debug!(mirror = %self.describe(), "watching remote document");
        Ok(Subscription::new(watcher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Task, TaskId};
    use chrono::NaiveDate;

    fn snapshot() -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.tasks.push(Task {
            id: TaskId::Int(1),
            text: "Stretch".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            time: Some("08:00".into()),
            completed_dates: Default::default(),
        });
        snapshot
    }

    #[test]
    fn missing_document_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = FileMirror::new(dir.path(), "sharedTasks", "data", DocumentLayout::Combined);
        assert!(mirror.read_snapshot().unwrap().is_none());
    }

    #[test]
    fn per_record_layout_reassembles_document() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = FileMirror::new(dir.path(), "sharedTasks", "data", DocumentLayout::PerRecord);
        mirror.write_snapshot(&snapshot()).unwrap();

        assert!(dir.path().join("sharedTasks/data-tasks.json").exists());
        assert!(dir.path().join("sharedTasks/data-streak.json").exists());
        assert!(dir.path().join("sharedTasks/data-routine.json").exists());

        let doc = mirror.read_snapshot().unwrap().unwrap();
        assert_eq!(doc.tasks.unwrap().len(), 1);
        assert_eq!(doc.routine_tasks, Some(Vec::new()));
        assert_eq!(doc.streak_data.unwrap().current_day, Some(1));
        assert!(doc.last_updated.is_some());
    }

    #[test]
    fn ignores_temp_files() {
        let mirror = FileMirror::new(Path::new("/shared"), "sharedTasks", "data", DocumentLayout::Combined);
        assert!(mirror.is_document_path(Path::new("/shared/sharedTasks/data.json")));
        assert!(!mirror.is_document_path(Path::new("/shared/sharedTasks/.data.json.tmp.42")));
    }
}
