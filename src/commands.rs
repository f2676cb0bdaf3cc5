use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::app::{SyncStatus, Tracker};
use crate::error::{Error, Result};
use crate::merge::MergeReport;
use crate::models::{Task, TaskId};
use crate::streak::{self, STREAK_WINDOW};
use crate::sync::consume_remote_changes;
use crate::tasks::{self, ToggleOutcome};
use crate::transfer;

/// Parses a `YYYY-MM-DD` argument.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| Error::InvalidArgument(format!("invalid date '{}': {}. Use YYYY-MM-DD.", raw, e)))
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

fn describe_merge(report: &MergeReport) -> String {
    if report.is_noop() {
        return "already up to date".to_string();
    }
    let mut parts = Vec::new();
    if report.tasks_added > 0 {
        parts.push(format!("{} task(s) added", report.tasks_added));
    }
    if report.tasks_updated > 0 {
        parts.push(format!("{} task(s) updated", report.tasks_updated));
    }
    if report.routine_replaced {
        parts.push("routine replaced".to_string());
    }
    if report.streak_fields > 0 {
        parts.push("streak updated".to_string());
    }
    parts.join(", ")
}

/// Adds a new task.
pub fn cmd_add(tracker: &mut Tracker, text: &str, date: Option<&str>, time: Option<&str>, today: NaiveDate, silent: bool) -> Result<()> {
    let date = date.map(parse_date).transpose()?;
    let id = tracker.add_task(text, date, time, today)?;
    if !silent {
        println!("Task added (id = {})", id);
    }
    Ok(())
}

/// Lists tasks in a table with today's progress and the streak.
///
/// By default only tasks eligible on `date` (today if absent) are shown;
/// `all` shows every task, future ones included.
pub fn cmd_list(tracker: &Tracker, all: bool, date: Option<&str>, today: NaiveDate) -> Result<()> {
    let day = date.map(parse_date).transpose()?.unwrap_or(today);
    let snapshot = tracker.snapshot();
    let shown: Vec<&Task> = if all {
        let mut every: Vec<&Task> = snapshot.tasks.iter().collect();
        every.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.time_or_default().cmp(b.time_or_default())));
        every
    } else {
        tasks::tasks_for_day(snapshot, day)
    };

    if shown.is_empty() {
        println!("No tasks found.");
    } else {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("ID").add_attribute(Attribute::Bold),
                Cell::new("Task").add_attribute(Attribute::Bold),
                Cell::new("Date").add_attribute(Attribute::Bold),
                Cell::new("Time").add_attribute(Attribute::Bold),
                Cell::new("Status").add_attribute(Attribute::Bold),
            ]);

        for t in shown {
            let (status, color) = if t.date > day {
                ("Scheduled", Color::Grey)
            } else if t.is_completed_on(day) {
                ("Done", Color::Green)
            } else {
                ("Pending", Color::Yellow)
            };
            table.add_row(vec![
                Cell::new(t.id),
                Cell::new(&t.text),
                Cell::new(t.date),
                Cell::new(tasks::format_time(t.time.as_deref())),
                Cell::new(status).fg(color),
            ]);
        }
        println!("{table}");
    }

    let progress = streak::day_progress(&snapshot.tasks, day);
    println!(
        "{}: {}/{} done ({:.0}%)",
        if day == today { "Today".to_string() } else { day.to_string() },
        progress.completed,
        progress.eligible,
        progress.percent()
    );
    println!(
        "Streak: day {} of {} ({:.0}%)",
        snapshot.streak.current_day,
        STREAK_WINDOW,
        snapshot.streak.overall_percent()
    );
    if let SyncStatus::Degraded(reason) = tracker.status() {
        println!("Sync degraded: {}", reason);
    }
    Ok(())
}

/// Toggles a task for today.
pub fn cmd_done(tracker: &mut Tracker, id: TaskId, today: NaiveDate, silent: bool) -> Result<()> {
    let outcome = tracker.toggle_task(id, today)?;
    if silent {
        return Ok(());
    }
    match outcome {
        ToggleOutcome::Completed { day_complete, streak_day } => {
            println!("Task {} done. Nice one!", id);
            if day_complete {
                println!("All tasks done for today! Streak: day {} of {}.", streak_day, STREAK_WINDOW);
            }
        }
        ToggleOutcome::Uncompleted => println!("Task {} marked as not done.", id),
    }
    Ok(())
}

/// Removes a task. Unknown ids are reported but are not an error.
pub fn cmd_remove(tracker: &mut Tracker, id: TaskId, silent: bool) -> Result<()> {
    let removed = tracker.delete_task(id)?;
    if !silent {
        if removed {
            println!("Task {} removed.", id);
        } else {
            println!("Task {} not found, nothing to remove.", id);
        }
    }
    Ok(())
}

pub fn cmd_routine_add(tracker: &mut Tracker, text: &str, time: Option<&str>, silent: bool) -> Result<()> {
    let id = tracker.add_routine(text, time)?;
    if !silent {
        println!("Routine entry added (id = {})", id);
    }
    Ok(())
}

/// Lists the routine entries.
pub fn cmd_routine_list(tracker: &Tracker) {
    let routine = &tracker.snapshot().routine_tasks;
    if routine.is_empty() {
        println!("No routine entries yet. Add some with `streakust routine add`.");
        return;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["ID", "Task", "Time"]);
    for r in routine {
        table.add_row(vec![
            r.id.to_string(),
            r.text.clone(),
            tasks::format_time(Some(&r.time)),
        ]);
    }
    println!("{table}");
}

pub fn cmd_routine_remove(tracker: &mut Tracker, id: TaskId, silent: bool) -> Result<()> {
    let removed = tracker.delete_routine(id)?;
    if !silent {
        if removed {
            println!("Routine entry {} removed.", id);
        } else {
            println!("Routine entry {} not found.", id);
        }
    }
    Ok(())
}

/// Empties the routine after confirmation.
pub fn cmd_routine_clear(tracker: &mut Tracker, force: bool, silent: bool) -> Result<()> {
    if !force && !confirm("Clear the whole routine? This cannot be undone.")? {
        println!("Aborted.");
        return Ok(());
    }
    let removed = tracker.clear_routine()?;
    if !silent {
        println!("Routine cleared ({} entries removed).", removed);
    }
    Ok(())
}

/// Spawns the routine's tasks on a day (today by default).
pub fn cmd_routine_apply(tracker: &mut Tracker, date: Option<&str>, today: NaiveDate, silent: bool) -> Result<()> {
    if tracker.snapshot().routine_tasks.is_empty() {
        return Err(Error::InvalidArgument(
            "no routine entries found, create a routine first".to_string(),
        ));
    }
    let day = date.map(parse_date).transpose()?.unwrap_or(today);
    let added = tracker.apply_routine(day)?;
    if !silent {
        if added > 0 {
            println!("Added {} routine task(s) to {}.", added, day);
        } else {
            println!("All routine tasks are already scheduled for {}.", day);
        }
    }
    Ok(())
}

/// Prints the streak summary.
pub fn cmd_streak(tracker: &Tracker) {
    let streak = &tracker.snapshot().streak;
    println!("Current streak: day {} of {} ({:.0}%)", streak.current_day, STREAK_WINDOW, streak.overall_percent());
    println!("Completed days: {}", streak.completed_days.len());
    if let Some(start) = streak.start_date {
        println!("Started:        {}", start);
    }
    if let Some(last) = streak.last_check_date {
        println!("Last completed: {}", last);
    }
}

/// Writes every record to a JSON file.
pub fn cmd_export(tracker: &Tracker, output: Option<PathBuf>, today: NaiveDate, silent: bool) -> Result<PathBuf> {
    let path = output.unwrap_or_else(|| transfer::default_export_name(today));
    let file = transfer::export(tracker.snapshot(), Utc::now());
    transfer::write_export(&path, &file)?;
    if !silent {
        println!("Data exported to {}", path.display());
    }
    Ok(path)
}

/// Replaces every record with the content of an export file.
pub fn cmd_import(tracker: &mut Tracker, path: &Path, force: bool, silent: bool) -> Result<()> {
    let imported = transfer::read_import(path)?;
    if !force && !confirm("This will replace your current data. Are you sure?")? {
        println!("Aborted.");
        return Ok(());
    }
    let count = imported.tasks.len();
    tracker.import(imported)?;
    if !silent {
        println!("Imported {} task(s) from {}.", count, path.display());
    }
    Ok(())
}

/// Restores the latest automatic backup.
pub fn cmd_restore_backup(tracker: &mut Tracker, force: bool, silent: bool) -> Result<()> {
    if !force && !confirm("Replace your current data with the latest backup?")? {
        println!("Aborted.");
        return Ok(());
    }
    let restored = tracker.restore_backup()?;
    if !silent {
        if restored {
            println!("Backup restored.");
        } else {
            println!("No backup has been taken yet.");
        }
    }
    Ok(())
}

/// Pulls the remote document, merges it, and pushes the merged state back.
pub fn cmd_sync(tracker: &mut Tracker, silent: bool) -> Result<()> {
    if tracker.mirror().is_none() {
        return Err(Error::InvalidConfig(
            "no remote configured; set [remote] in the config or STREAKUST_REMOTE_ROOT".to_string(),
        ));
    }
    if !silent {
        match tracker.load_report() {
            Some(report) => println!("Pulled: {}", describe_merge(&report)),
            None => println!("Pulled: nothing to merge"),
        }
    }
    tracker.save()?;
    Ok(())
}

/// Prints where data lives and how sync is doing.
pub fn cmd_status(tracker: &Tracker) {
    let store = tracker.store();
    println!("Data directory: {}", store.dir().display());
    println!("Saves:          {}", store.save_count());
    match store.last_save() {
        Some(at) => println!("Last save:      {}", at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")),
        None => println!("Last save:      never"),
    }
    println!("Remote:         {}", tracker.status());
}

/// Merges remote changes as they arrive until Ctrl-C.
pub async fn cmd_watch(tracker: Tracker, silent: bool) -> Result<SyncStatus> {
    let Some(mirror) = tracker.mirror().cloned() else {
        return Err(Error::InvalidConfig(
            "no remote configured; set [remote] in the config or STREAKUST_REMOTE_ROOT".to_string(),
        ));
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = mirror.subscribe(tx)?;
    if !silent {
        println!("Watching {} (Ctrl-C to stop)", mirror.describe());
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let tracker = Arc::new(Mutex::new(tracker));
    let applied = consume_remote_changes(Arc::clone(&tracker), rx, shutdown, |report| {
        if !silent && !report.is_noop() {
            println!("{} Remote change: {}", Local::now().format("%H:%M:%S"), describe_merge(report));
        }
    })
    .await;
    drop(subscription);

    if !silent {
        println!("Stopped after {} remote change(s).", applied);
    }
    let tracker = Arc::try_unwrap(tracker)
        .map_err(|_| Error::Remote("watch session still in use".to_string()))?
        .into_inner();
    Ok(tracker.shutdown().await)
}
