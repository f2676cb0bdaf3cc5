//! JSON export and import of the whole snapshot.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{RoutineTask, Snapshot, StreakState, Task};
use crate::storage::write_atomic;
use crate::streak;

/// Version written to export files.
pub const EXPORT_VERSION: &str = "1.0";

/// Export file layout.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    pub tasks: Vec<Task>,
    pub streak_data: StreakState,
    pub routine_tasks: Vec<RoutineTask>,
    pub export_date: DateTime<Utc>,
    pub version: String,
}

/// Data read from an import file. Streak and routine are optional.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ImportedData {
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub streak_data: Option<StreakState>,
    #[serde(default)]
    pub routine_tasks: Option<Vec<RoutineTask>>,
}

pub fn export(snapshot: &Snapshot, now: DateTime<Utc>) -> ExportFile {
    ExportFile {
        tasks: snapshot.tasks.clone(),
        streak_data: snapshot.streak.clone(),
        routine_tasks: snapshot.routine_tasks.clone(),
        export_date: now,
        version: EXPORT_VERSION.to_string(),
    }
}

/// File name used when no output path is given.
pub fn default_export_name(today: NaiveDate) -> PathBuf {
    PathBuf::from(format!("streakust-backup-{}.json", today.format("%Y-%m-%d")))
}

pub fn write_export(path: &Path, file: &ExportFile) -> Result<()> {
    let s = serde_json::to_string_pretty(file)?;
    write_atomic(path, s.as_bytes())
}

/// Parses an import file.
///
/// The document must hold a `tasks` array; anything else is a format error.
pub fn parse_import(raw: &str) -> Result<ImportedData> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| Error::Format(format!("not valid JSON: {}", e)))?;
    match value.get("tasks") {
        Some(serde_json::Value::Array(_)) => {}
        Some(_) => return Err(Error::Format("`tasks` must be an array".to_string())),
        None => return Err(Error::Format("missing `tasks`".to_string())),
    }
    serde_json::from_value(value).map_err(|e| Error::Format(e.to_string()))
}

pub fn read_import(path: &Path) -> Result<ImportedData> {
    let raw = std::fs::read_to_string(path)?;
    parse_import(&raw)
}

/// Replaces the snapshot with imported data. Streak and routine are only
/// replaced when the file carries them.
pub fn apply_import(snapshot: &mut Snapshot, imported: ImportedData) {
    snapshot.tasks = imported.tasks;
    if let Some(streak_data) = imported.streak_data {
        snapshot.streak = streak_data;
    }
    if let Some(routine) = imported.routine_tasks {
        snapshot.routine_tasks = routine;
    }
    streak::recompute(&mut snapshot.streak);
}
