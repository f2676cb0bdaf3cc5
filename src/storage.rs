//! Local persistent store
//!
//! Keeps the snapshot as one JSON file per key inside the data directory:
//!
//! ```text
//! <data dir>/
//!   tasks.json                # Task list
//!   streak-state.json         # Streak bookkeeping
//!   routine-tasks.json        # Routine entries
//!   last-save.json            # RFC 3339 timestamp of the last save
//!   save-count.json           # Monotonic save counter
//!   *.backup.json             # Copies of the three records, every Nth save
//!   .lock                     # Advisory lock held while saving
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{RoutineTask, Snapshot, StreakState, Task};

/// Environment variable overriding the data directory
pub const HOME_ENV: &str = "STREAKUST_HOME";

/// How long a save waits for another process holding the store lock
pub const LOCK_TIMEOUT_MS: u64 = 5000;

const LOCK_RETRY_INTERVAL_MS: u64 = 50;

/// Returns the data directory.
///
/// The path is determined in the following order:
/// 1. `STREAKUST_HOME` environment variable.
/// 2. `storage.data_dir` from the config file.
/// 3. `~/.local/share/streakust` (on Linux).
/// 4. `./streakust` (fallback).
pub fn data_dir(config: &Config) -> PathBuf {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(dir) = &config.storage.data_dir {
        return dir.clone();
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("streakust")
}

/// Keys held by the store, one file each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Tasks,
    Streak,
    Routine,
    LastSave,
    SaveCount,
    TasksBackup,
    StreakBackup,
    RoutineBackup,
}

impl Key {
    pub fn file_name(self) -> &'static str {
        match self {
            Key::Tasks => "tasks.json",
            Key::Streak => "streak-state.json",
            Key::Routine => "routine-tasks.json",
            Key::LastSave => "last-save.json",
            Key::SaveCount => "save-count.json",
            Key::TasksBackup => "tasks.backup.json",
            Key::StreakBackup => "streak-state.backup.json",
            Key::RoutineBackup => "routine-tasks.backup.json",
        }
    }
}

/// Outcome of a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReceipt {
    /// Value of the save counter after this save
    pub count: u64,
    /// Whether this save also refreshed the backup copies
    pub backed_up: bool,
}

/// Durable key/value store for the snapshot.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
    backup_every: u64,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>, backup_every: u64) -> Self {
        Self {
            dir: dir.into(),
            backup_every: backup_every.max(1),
        }
    }

    /// Opens the store at the configured data directory, creating it if needed.
    pub fn open(config: &Config) -> Result<Self> {
        let store = Self::new(data_dir(config), config.storage.backup_every);
        fs::create_dir_all(&store.dir)?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: Key) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Loads the snapshot.
    ///
    /// Missing records load as empty. Records that cannot be read or parsed
    /// are logged and also load as empty.
    pub fn load_snapshot(&self) -> Snapshot {
        Snapshot {
            tasks: self.read_key::<Vec<Task>>(Key::Tasks).unwrap_or_default(),
            routine_tasks: self.read_key::<Vec<RoutineTask>>(Key::Routine).unwrap_or_default(),
            streak: self.read_key::<StreakState>(Key::Streak).unwrap_or_default(),
        }
    }

    /// Loads the backup copies, if a backup was ever taken.
    pub fn load_backup(&self) -> Option<Snapshot> {
        let tasks = self.read_key::<Vec<Task>>(Key::TasksBackup)?;
        Some(Snapshot {
            tasks,
            routine_tasks: self.read_key(Key::RoutineBackup).unwrap_or_default(),
            streak: self.read_key(Key::StreakBackup).unwrap_or_default(),
        })
    }

    /// Number of saves performed so far.
    pub fn save_count(&self) -> u64 {
        self.read_key(Key::SaveCount).unwrap_or(0)
    }

    /// Time of the last save.
    pub fn last_save(&self) -> Option<DateTime<Utc>> {
        self.read_key(Key::LastSave)
    }

    /// Saves the snapshot, bumps the save counter and refreshes the backup
    /// copies on every `backup_every`-th save.
    pub fn save_snapshot(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> Result<SaveReceipt> {
        let _lock = StoreLock::acquire(&self.dir.join(".lock"), LOCK_TIMEOUT_MS)?;

        self.write_key(Key::Tasks, &snapshot.tasks)?;
        self.write_key(Key::Streak, &snapshot.streak)?;
        self.write_key(Key::Routine, &snapshot.routine_tasks)?;
        self.write_key(Key::LastSave, &now)?;

        let count = self.save_count() + 1;
        self.write_key(Key::SaveCount, &count)?;

        let backed_up = count % self.backup_every == 0;
        if backed_up {
            self.write_key(Key::TasksBackup, &snapshot.tasks)?;
            self.write_key(Key::StreakBackup, &snapshot.streak)?;
            self.write_key(Key::RoutineBackup, &snapshot.routine_tasks)?;
            info!(count, "backup copies refreshed");
        }
        debug!(count, tasks = snapshot.tasks.len(), "snapshot saved");
        Ok(SaveReceipt { count, backed_up })
    }

    fn read_key<T: DeserializeOwned>(&self, key: Key) -> Option<T> {
        let path = self.path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read record");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt record");
                None
            }
        }
    }

    fn write_key<T: Serialize + ?Sized>(&self, key: Key, value: &T) -> Result<()> {
        let s = serde_json::to_string_pretty(value)?;
        write_atomic(&self.path(key), s.as_bytes())
    }
}

/// Writes `data` to `path` through a temp file and rename, so readers never
/// observe a partial file.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Temp file in the same directory keeps the rename atomic.
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    let temp_path = path.with_file_name(format!(".{}.tmp.{}", file_name, std::process::id()));

    let mut temp_file = File::create(&temp_path)?;
    temp_file.write_all(data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Exclusive advisory lock on a lock file, released on drop.
pub struct StoreLock {
    file: File,
}

impl StoreLock {
    /// Acquires the lock, waiting up to `timeout_ms` for other holders.
    pub fn acquire(path: &Path, timeout_ms: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(StoreLock { file }),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(Error::LockFailed(path.to_path_buf()));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_INTERVAL_MS));
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
