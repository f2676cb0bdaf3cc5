use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::models::{StreakState, Task};

/// Longest streak tracked; `current_day` never exceeds this.
pub const STREAK_WINDOW: u32 = 30;

/// Counts the run of consecutive days ending at the most recent completed day.
///
/// Walks backward from the newest entry, one calendar day at a time, and stops
/// at the first gap. The result is capped at [`STREAK_WINDOW`] and is `1` for
/// an empty history.
pub fn consecutive_run(completed_days: &BTreeSet<NaiveDate>) -> u32 {
    let mut days = completed_days.iter().rev();
    let Some(mut newer) = days.next().copied() else {
        return 1;
    };
    let mut run = 1u32;
    for &older in days {
        if (newer - older).num_days() != 1 {
            break;
        }
        run += 1;
        newer = older;
        if run >= STREAK_WINDOW {
            break;
        }
    }
    run.min(STREAK_WINDOW)
}

/// Recomputes `current_day` from `completed_days`.
pub fn recompute(state: &mut StreakState) {
    state.current_day = consecutive_run(&state.completed_days);
}

fn reset(state: &mut StreakState, today: NaiveDate) {
    state.current_day = 1;
    state.completed_days.clear();
    state.start_date = Some(today);
}

/// Brings a persisted streak up to date with `today`.
///
/// Runs once per session before any other streak mutation:
/// - **Never checked**: the streak starts today if nothing was completed yet.
/// - **Checked today**: nothing changes.
/// - **Checked yesterday**: the streak survives only if that day was completed.
/// - **Older**: the streak is broken and restarts today.
///
/// Safe to call repeatedly on the same day.
pub fn reconcile_on_load(state: &mut StreakState, today: NaiveDate) {
    let Some(last_check) = state.last_check_date else {
        if state.completed_days.is_empty() {
            state.start_date = Some(today);
        }
        recompute(state);
        return;
    };

    let gap = (today - last_check).num_days();
    match gap {
        0 => {}
        1 if state.completed_days.contains(&last_check) => {}
        1 => {
            debug!(%last_check, "previous day was not completed, streak reset");
            reset(state, today);
        }
        g if g > 1 => {
            debug!(%last_check, gap = g, "streak broken by missed days");
            reset(state, today);
        }
        g => {
            warn!(%last_check, %today, gap = g, "last streak check is in the future, leaving streak as is");
        }
    }
    recompute(state);
}

/// Records that every eligible task for `day` was completed.
///
/// A day that follows the previous completed day extends the streak; any
/// other day restarts it with `day` as the only completed day.
pub fn record_day_completion(state: &mut StreakState, day: NaiveDate) {
    if !state.completed_days.insert(day) {
        return;
    }
    state.last_check_date = Some(day);

    if state.completed_days.len() == 1 {
        state.start_date = Some(day);
    } else {
        let previous = state.completed_days.iter().rev().nth(1).copied();
        let consecutive = previous.is_some_and(|p| (day - p).num_days() == 1);
        if !consecutive {
            debug!(%day, ?previous, "completed day does not follow the previous one, streak restarted");
            state.completed_days.clear();
            state.completed_days.insert(day);
            state.start_date = Some(day);
        }
    }
    recompute(state);
}

/// A task counts towards `day` once its own date has arrived.
pub fn is_eligible(task: &Task, day: NaiveDate) -> bool {
    task.date <= day
}

/// Completion counts for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayProgress {
    pub eligible: usize,
    pub completed: usize,
}

impl DayProgress {
    /// Share of eligible tasks completed, `0.0` when nothing is eligible.
    pub fn percent(&self) -> f64 {
        if self.eligible == 0 {
            return 0.0;
        }
        self.completed as f64 / self.eligible as f64 * 100.0
    }

    /// Whether the day counts towards the streak.
    ///
    /// A day without eligible tasks never counts.
    pub fn is_complete(&self) -> bool {
        self.eligible > 0 && self.completed == self.eligible
    }
}

/// Counts eligible and completed tasks for `day`.
pub fn day_progress(tasks: &[Task], day: NaiveDate) -> DayProgress {
    tasks
        .iter()
        .filter(|t| is_eligible(t, day))
        .fold(DayProgress { eligible: 0, completed: 0 }, |mut p, t| {
            p.eligible += 1;
            if t.is_completed_on(day) {
                p.completed += 1;
            }
            p
        })
}

/// Whether every eligible task was completed on `day`.
pub fn all_eligible_completed(tasks: &[Task], day: NaiveDate) -> bool {
    day_progress(tasks, day).is_complete()
}

impl StreakState {
    /// Progress through the streak window as a percentage.
    pub fn overall_percent(&self) -> f64 {
        f64::from(self.current_day.min(STREAK_WINDOW)) / f64::from(STREAK_WINDOW) * 100.0
    }
}
