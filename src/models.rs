use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Time assigned to tasks and routine entries created without one.
pub const DEFAULT_TIME: &str = "00:00";

/// Identifier of a task or routine entry.
///
/// Ids are numeric tokens. Most are whole millisecond timestamps, but data
/// written by older clients may carry fractional ids, so both shapes are
/// accepted and compared by numeric value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(untagged)]
pub enum TaskId {
    Int(u64),
    Float(f64),
}

impl TaskId {
    /// Canonical form used for equality and hashing: integral floats compare
    /// equal to the matching integer.
    fn canonical(&self) -> (u8, u64) {
        match *self {
            TaskId::Int(n) => (0, n),
            TaskId::Float(f) if f.fract() == 0.0 && f >= 0.0 && f < u64::MAX as f64 => (0, f as u64),
            TaskId::Float(f) => (1, f.to_bits()),
        }
    }

    /// Smallest integer strictly greater than this id, `None` when no such
    /// `u64` exists.
    fn successor(&self) -> Option<u64> {
        match *self {
            TaskId::Int(n) => n.checked_add(1),
            TaskId::Float(f) if f.is_finite() && f >= 0.0 => {
                if f.floor() >= u64::MAX as f64 {
                    return None;
                }
                (f.floor() as u64).checked_add(1)
            }
            TaskId::Float(_) => Some(0),
        }
    }

    /// Allocates an id that is unique among `existing`.
    ///
    /// Uses the current millisecond timestamp, bumped past the largest id
    /// already in use so that ids allocated within the same millisecond differ.
    /// When an existing id sits at the top of the range, the first unused
    /// integer from the timestamp on is taken instead.
    pub fn fresh<'a>(existing: impl IntoIterator<Item = &'a TaskId>, now_ms: u64) -> TaskId {
        let existing: Vec<TaskId> = existing.into_iter().copied().collect();
        let floor = existing
            .iter()
            .try_fold(0u64, |floor, id| id.successor().map(|next| floor.max(next)));
        if let Some(floor) = floor {
            return TaskId::Int(now_ms.max(floor));
        }

        let used: HashSet<TaskId> = existing.into_iter().collect();
        let mut candidate = now_ms;
        while used.contains(&TaskId::Int(candidate)) {
            candidate = candidate.wrapping_add(1);
        }
        TaskId::Int(candidate)
    }
}

impl PartialEq for TaskId {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for TaskId {}

impl Hash for TaskId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Int(n) => write!(f, "{}", n),
            TaskId::Float(v) => write!(f, "{}", v),
        }
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u64>() {
            return Ok(TaskId::Int(n));
        }
        match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(TaskId::Float(v)),
            _ => Err(Error::InvalidArgument(format!("'{}' is not a task id", s))),
        }
    }
}

/// A single dated task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique identifier for the task.
    pub id: TaskId,
    /// What needs doing.
    pub text: String,
    /// The day the task is scheduled for.
    pub date: NaiveDate,
    /// Scheduled time as `HH:MM`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Days on which the task was checked off.
    #[serde(default)]
    pub completed_dates: BTreeSet<NaiveDate>,
}

impl Task {
    /// Whether the task was checked off on `day`.
    pub fn is_completed_on(&self, day: NaiveDate) -> bool {
        self.completed_dates.contains(&day)
    }

    /// The scheduled time, falling back to [`DEFAULT_TIME`].
    pub fn time_or_default(&self) -> &str {
        self.time.as_deref().unwrap_or(DEFAULT_TIME)
    }
}

/// A reusable daily routine entry. Applying the routine to a day spawns a
/// [`Task`] per entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RoutineTask {
    pub id: TaskId,
    pub text: String,
    #[serde(default = "default_time")]
    pub time: String,
}

fn default_time() -> String {
    DEFAULT_TIME.to_string()
}

/// Streak bookkeeping over fully completed days.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreakState {
    /// First day of the current streak.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Length of the current run of completed days, within `1..=30`.
    #[serde(default = "first_day")]
    pub current_day: u32,
    /// Days on which every eligible task was completed.
    #[serde(default)]
    pub completed_days: BTreeSet<NaiveDate>,
    /// Last day recorded as completed.
    #[serde(default)]
    pub last_check_date: Option<NaiveDate>,
}

fn first_day() -> u32 {
    1
}

impl Default for StreakState {
    fn default() -> Self {
        Self {
            start_date: None,
            current_day: first_day(),
            completed_days: BTreeSet::new(),
            last_check_date: None,
        }
    }
}

/// The three records persisted and replicated as a unit.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default, rename = "routineTasks")]
    pub routine_tasks: Vec<RoutineTask>,
    #[serde(default, rename = "streakData")]
    pub streak: StreakState,
}

impl Snapshot {
    /// Looks up a task by id.
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Every id in use by tasks and routine entries.
    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks
            .iter()
            .map(|t| &t.id)
            .chain(self.routine_tasks.iter().map(|r| &r.id))
    }
}
