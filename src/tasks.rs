//! Task and routine operations over a [`Snapshot`].

use chrono::{NaiveDate, NaiveTime};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{RoutineTask, Snapshot, Task, TaskId, DEFAULT_TIME};
use crate::streak;

/// Result of toggling a task for today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The task was checked off.
    Completed {
        /// Every eligible task is now done, and the day was recorded in the streak
        day_complete: bool,
        /// Streak length after the toggle
        streak_day: u32,
    },
    /// The check was removed.
    Uncompleted,
}

fn validate_text(text: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::Validation("task text must not be empty".to_string()));
    }
    Ok(text.to_string())
}

/// Checks a `HH:MM` time and returns it normalized, [`DEFAULT_TIME`] if absent.
pub fn validate_time(time: Option<&str>) -> Result<String> {
    let Some(raw) = time.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(DEFAULT_TIME.to_string());
    };
    let parsed = NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|_| Error::Validation(format!("invalid time '{}', use HH:MM", raw)))?;
    Ok(parsed.format("%H:%M").to_string())
}

fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Adds a task. `date` defaults to `today`, `time` to `00:00`.
pub fn add(
    snapshot: &mut Snapshot,
    text: &str,
    date: Option<NaiveDate>,
    time: Option<&str>,
    today: NaiveDate,
) -> Result<TaskId> {
    let text = validate_text(text)?;
    let time = validate_time(time)?;
    let id = TaskId::fresh(snapshot.ids(), now_ms());
    snapshot.tasks.push(Task {
        id,
        text,
        date: date.unwrap_or(today),
        time: Some(time),
        completed_dates: Default::default(),
    });
    debug!(%id, "task added");
    Ok(id)
}

/// Removes a task. Removing an unknown id is not an error; returns whether a
/// task was removed.
pub fn delete(snapshot: &mut Snapshot, id: TaskId) -> bool {
    let before = snapshot.tasks.len();
    snapshot.tasks.retain(|t| t.id != id);
    snapshot.tasks.len() != before
}

/// Flips whether the task was done `today`.
///
/// Checking a task off also checks whether every eligible task is done for
/// `today`, and if so records the day in the streak. Unchecking never touches
/// the streak.
pub fn toggle_completion(snapshot: &mut Snapshot, id: TaskId, today: NaiveDate) -> Result<ToggleOutcome> {
    let task = snapshot
        .tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or(Error::TaskNotFound(id))?;

    if task.date > today {
        return Err(Error::FutureTask { id, date: task.date });
    }

    if task.completed_dates.remove(&today) {
        debug!(%id, %today, "task unchecked");
        return Ok(ToggleOutcome::Uncompleted);
    }
    task.completed_dates.insert(today);

    let day_complete = streak::all_eligible_completed(&snapshot.tasks, today);
    if day_complete {
        streak::record_day_completion(&mut snapshot.streak, today);
    }
    debug!(%id, %today, day_complete, "task checked off");
    Ok(ToggleOutcome::Completed {
        day_complete,
        streak_day: snapshot.streak.current_day,
    })
}

/// Spawns a task on `day` for each routine entry not already scheduled there.
///
/// An entry counts as scheduled when a task on `day` has the same text and
/// time. Returns how many tasks were added.
pub fn apply_routine_to_day(snapshot: &mut Snapshot, day: NaiveDate) -> usize {
    let mut added = 0;
    let mut now = now_ms();
    for entry in snapshot.routine_tasks.clone() {
        let exists = snapshot
            .tasks
            .iter()
            .any(|t| t.date == day && t.text == entry.text && t.time.as_deref() == Some(entry.time.as_str()));
        if exists {
            continue;
        }
        let id = TaskId::fresh(snapshot.ids(), now);
        now = now.saturating_add(1);
        snapshot.tasks.push(Task {
            id,
            text: entry.text,
            date: day,
            time: Some(entry.time),
            completed_dates: Default::default(),
        });
        added += 1;
    }
    debug!(%day, added, "routine applied");
    added
}

/// Adds a routine entry.
pub fn add_routine(snapshot: &mut Snapshot, text: &str, time: Option<&str>) -> Result<TaskId> {
    let text = validate_text(text)?;
    let time = validate_time(time)?;
    let id = TaskId::fresh(snapshot.ids(), now_ms());
    snapshot.routine_tasks.push(RoutineTask { id, text, time });
    Ok(id)
}

/// Removes a routine entry; returns whether it existed.
pub fn delete_routine(snapshot: &mut Snapshot, id: TaskId) -> bool {
    let before = snapshot.routine_tasks.len();
    snapshot.routine_tasks.retain(|r| r.id != id);
    snapshot.routine_tasks.len() != before
}

/// Empties the routine; returns how many entries were removed.
pub fn clear_routine(snapshot: &mut Snapshot) -> usize {
    let removed = snapshot.routine_tasks.len();
    snapshot.routine_tasks.clear();
    removed
}

/// Tasks eligible on `day`, ordered by date then time.
pub fn tasks_for_day(snapshot: &Snapshot, day: NaiveDate) -> Vec<&Task> {
    let mut tasks: Vec<&Task> = snapshot
        .tasks
        .iter()
        .filter(|t| streak::is_eligible(t, day))
        .collect();
    tasks.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.time_or_default().cmp(b.time_or_default()))
    });
    tasks
}

/// Formats a `HH:MM` time for display, "All Day" for midnight.
pub fn format_time(time: Option<&str>) -> String {
    let Some(time) = time.filter(|t| *t != DEFAULT_TIME) else {
        return "All Day".to_string();
    };
    match NaiveTime::parse_from_str(time, "%H:%M") {
        Ok(t) => t.format("%-I:%M %p").to_string(),
        Err(_) => time.to_string(),
    }
}
