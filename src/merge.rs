//! Local/remote snapshot reconciliation
//!
//! Each record has its own conflict policy:
//! - **Tasks**: merged by id. The remote copy wins on a collision, remote-only
//!   tasks are appended and local-only tasks are kept. A task deleted locally
//!   comes back if the remote still has it.
//! - **Routine**: replaced wholesale by a non-empty remote routine. An empty
//!   remote routine means "not written yet" and never clears the local one.
//! - **Streak**: every field present remotely overwrites the local field.
//!
//! A whole-snapshot last-write-wins would silently drop tasks created offline,
//! so the policies are applied per record.

use std::collections::HashMap;

use crate::models::{RoutineTask, Snapshot, StreakState, Task, TaskId};
use crate::remote::{RemoteDocument, RemoteStreak};
use crate::streak;

/// What a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Local tasks overwritten by a different remote copy
    pub tasks_updated: usize,
    /// Remote tasks that were not known locally
    pub tasks_added: usize,
    /// Whether the routine was replaced by the remote one
    pub routine_replaced: bool,
    /// Streak fields changed by the remote record
    pub streak_fields: usize,
}

impl MergeReport {
    pub fn is_noop(&self) -> bool {
        self.tasks_updated == 0 && self.tasks_added == 0 && !self.routine_replaced && self.streak_fields == 0
    }
}

/// Merges remote tasks into `local` by id. Returns `(updated, added)`.
pub fn merge_tasks(local: &mut Vec<Task>, remote: Vec<Task>) -> (usize, usize) {
    let mut index: HashMap<TaskId, usize> = local
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id, i))
        .collect();
    let mut updated = 0;
    let mut added = 0;

    for task in remote {
        match index.get(&task.id) {
            Some(&i) => {
                if local[i] != task {
                    updated += 1;
                }
                local[i] = task;
            }
            None => {
                index.insert(task.id, local.len());
                local.push(task);
                added += 1;
            }
        }
    }
    (updated, added)
}

/// Replaces the local routine with a non-empty remote one.
pub fn merge_routine(local: &mut Vec<RoutineTask>, remote: Vec<RoutineTask>) -> bool {
    if remote.is_empty() {
        return false;
    }
    let changed = *local != remote;
    *local = remote;
    changed
}

/// Overwrites every local streak field present in `remote`, then recomputes
/// `current_day` from the merged history. Returns the number of fields whose
/// value differs afterwards.
pub fn merge_streak(local: &mut StreakState, remote: RemoteStreak) -> usize {
    let before = local.clone();
    if let Some(start_date) = remote.start_date {
        local.start_date = start_date;
    }
    if let Some(current_day) = remote.current_day {
        local.current_day = current_day;
    }
    if let Some(completed_days) = remote.completed_days {
        local.completed_days = completed_days;
    }
    if let Some(last_check_date) = remote.last_check_date {
        local.last_check_date = last_check_date;
    }
    streak::recompute(local);

    [
        before.start_date != local.start_date,
        before.current_day != local.current_day,
        before.completed_days != local.completed_days,
        before.last_check_date != local.last_check_date,
    ]
    .into_iter()
    .filter(|changed| *changed)
    .count()
}

/// Merges a remote document into the local snapshot.
pub fn merge_snapshot(local: &mut Snapshot, remote: RemoteDocument) -> MergeReport {
    let mut report = MergeReport::default();
    if let Some(tasks) = remote.tasks {
        let (updated, added) = merge_tasks(&mut local.tasks, tasks);
        report.tasks_updated = updated;
        report.tasks_added = added;
    }
    if let Some(routine) = remote.routine_tasks {
        report.routine_replaced = merge_routine(&mut local.routine_tasks, routine);
    }
    if let Some(remote_streak) = remote.streak_data {
        report.streak_fields = merge_streak(&mut local.streak, remote_streak);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn merged_streak_keeps_current_day_consistent() {
        let mut local = StreakState::default();
        let remote = RemoteStreak {
            current_day: Some(9),
            completed_days: Some([day(1), day(2), day(3)].into_iter().collect()),
            ..Default::default()
        };
        assert_eq!(merge_streak(&mut local, remote), 2);
        assert_eq!(local.current_day, 3);
    }

    #[test]
    fn stale_remote_current_day_is_not_a_change() {
        let mut local = StreakState::default();
        let remote = RemoteStreak {
            current_day: Some(7),
            ..Default::default()
        };
        assert_eq!(merge_streak(&mut local, remote), 0);
        assert_eq!(local, StreakState::default());
    }

    #[test]
    fn identical_remote_task_is_not_counted_as_update() {
        let task = Task {
            id: TaskId::Int(1),
            text: "Water plants".into(),
            date: day(1),
            time: None,
            completed_dates: Default::default(),
        };
        let mut local = vec![task.clone()];
        assert_eq!(merge_tasks(&mut local, vec![task]), (0, 0));
    }
}
