use std::fs;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use streakust::app::{SyncStatus, Tracker};
use streakust::config::{DocumentLayout, RemoteConfig};
use streakust::models::{Snapshot, Task, TaskId};
use streakust::remote::{FileMirror, MemoryMirror, RemoteDocument, RemoteMirror};
use streakust::storage::LocalStore;
use streakust::sync::consume_remote_changes;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn task(id: u64, text: &str, done: &[&str]) -> Task {
    Task {
        id: TaskId::Int(id),
        text: text.into(),
        date: date("2024-01-01"),
        time: Some("00:00".into()),
        completed_dates: done.iter().map(|d| date(d)).collect(),
    }
}

fn remote_config() -> RemoteConfig {
    RemoteConfig {
        enabled: true,
        write_retries: 1,
        retry_backoff_ms: 1,
        ..Default::default()
    }
}

fn store_with(dir: &std::path::Path, tasks: Vec<Task>) -> LocalStore {
    let store = LocalStore::new(dir, 10);
    let snapshot = Snapshot {
        tasks,
        ..Default::default()
    };
    store.save_snapshot(&snapshot, Utc::now()).unwrap();
    store
}

/// Waits for the first change matching `wanted`, giving up after a few seconds.
async fn next_change<F>(rx: &mut mpsc::UnboundedReceiver<RemoteDocument>, mut wanted: F) -> Option<RemoteDocument>
where
    F: FnMut(&RemoteDocument) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match timeout_at(deadline, rx.recv()).await {
            Ok(Some(doc)) if wanted(&doc) => return Some(doc),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}

/// Discards changes until the watcher has been quiet for a while.
async fn drain(rx: &mut mpsc::UnboundedReceiver<RemoteDocument>) {
    while let Ok(Some(_)) = timeout(Duration::from_millis(300), rx.recv()).await {}
}

async fn open(store: LocalStore, mirror: &Arc<MemoryMirror>) -> Tracker {
    let mirror: Arc<dyn RemoteMirror> = mirror.clone();
    Tracker::open_with(store, Some(mirror), &remote_config(), date("2024-01-01"))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_initial_load_merges_remote_and_writes_through() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(dir.path(), vec![task(1, "Walk", &[])]);
    let mirror = Arc::new(MemoryMirror::with_document(RemoteDocument {
        tasks: Some(vec![task(1, "Walk", &["2024-01-01"]), task(2, "Read", &[])]),
        ..Default::default()
    }));

    let tracker = open(store.clone(), &mirror).await;
    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.tasks.len(), 2);
    assert!(snapshot.task(TaskId::Int(1)).unwrap().is_completed_on(date("2024-01-01")));

    let report = tracker.load_report().unwrap();
    assert_eq!(report.tasks_added, 1);
    assert_eq!(report.tasks_updated, 1);
    assert_eq!(store.load_snapshot().tasks.len(), 2);
    assert!(matches!(tracker.status(), SyncStatus::Connected(_)));

    tracker.shutdown().await;
    assert_eq!(mirror.write_count(), 0);
}

#[tokio::test]
async fn test_failed_remote_load_falls_back_to_local() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(dir.path(), vec![task(1, "Walk", &[])]);
    let mirror = Arc::new(MemoryMirror::with_document(RemoteDocument {
        tasks: Some(vec![task(2, "Read", &[])]),
        ..Default::default()
    }));
    mirror.set_offline(true);

    let tracker = open(store, &mirror).await;
    assert_eq!(tracker.snapshot().tasks.len(), 1);
    assert!(matches!(tracker.status(), SyncStatus::Degraded(_)));
}

#[tokio::test]
async fn test_save_is_mirrored_after_flush() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path(), 10);
    let mirror = Arc::new(MemoryMirror::new());

    let mut tracker = open(store, &mirror).await;
    tracker
        .add_task("Stretch", None, Some("07:00"), date("2024-01-01"))
        .unwrap();
    let status = tracker.shutdown().await;

    assert!(matches!(status, SyncStatus::Connected(_)));
    let doc = mirror.document().unwrap();
    assert_eq!(doc.tasks.unwrap()[0].text, "Stretch");
    assert!(doc.last_updated.is_some());
}

#[tokio::test]
async fn test_rapid_saves_end_with_latest_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path(), 10);
    let mirror = Arc::new(MemoryMirror::new());

    let mut tracker = open(store, &mirror).await;
    for i in 0..10 {
        tracker
            .add_task(&format!("Task {}", i), None, None, date("2024-01-01"))
            .unwrap();
    }
    tracker.shutdown().await;

    assert!(mirror.write_count() >= 1);
    assert!(mirror.write_count() <= 10);
    assert_eq!(mirror.document().unwrap().tasks.unwrap().len(), 10);
}

#[tokio::test]
async fn test_remote_write_failure_keeps_local_copy() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path(), 10);
    let mirror = Arc::new(MemoryMirror::new());

    let mut tracker = open(store.clone(), &mirror).await;
    mirror.set_offline(true);
    tracker
        .add_task("Offline task", None, None, date("2024-01-01"))
        .unwrap();
    let status = tracker.shutdown().await;

    assert!(matches!(status, SyncStatus::Degraded(_)));
    assert_eq!(store.load_snapshot().tasks.len(), 1);
    assert!(mirror.document().is_none());
}

#[tokio::test]
async fn test_remote_changes_are_merged_without_echo() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(dir.path(), vec![task(1, "Local", &[])]);
    let mirror = Arc::new(MemoryMirror::new());
    let tracker = open(store.clone(), &mirror).await;

    let (tx, rx) = mpsc::unbounded_channel();
    let _subscription = mirror.subscribe(tx).unwrap();
    mirror.publish(RemoteDocument {
        tasks: Some(vec![task(2, "From phone", &[])]),
        routine_tasks: Some(Vec::new()),
        ..Default::default()
    });

    let tracker = Arc::new(Mutex::new(tracker));
    let shutdown = CancellationToken::new();
    let stop = shutdown.clone();
    let mut reports = Vec::new();
    let applied = consume_remote_changes(Arc::clone(&tracker), rx, shutdown, |report| {
        reports.push(*report);
        stop.cancel();
    })
    .await;

    assert_eq!(applied, 1);
    assert_eq!(reports[0].tasks_added, 1);
    assert!(!reports[0].routine_replaced);
    assert_eq!(tracker.lock().await.snapshot().tasks.len(), 2);
    assert_eq!(store.load_snapshot().tasks.len(), 2);
    assert_eq!(mirror.write_count(), 0);
}

#[tokio::test]
async fn test_file_mirror_round_trip_between_trackers() {
    let shared = tempfile::tempdir().unwrap();
    let laptop_dir = tempfile::tempdir().unwrap();
    let phone_dir = tempfile::tempdir().unwrap();
    let mirror: Arc<dyn RemoteMirror> = Arc::new(FileMirror::new(
        shared.path(),
        "sharedTasks",
        "data",
        DocumentLayout::Combined,
    ));
    let today = date("2024-01-01");

    let mut laptop = Tracker::open_with(
        LocalStore::new(laptop_dir.path(), 10),
        Some(Arc::clone(&mirror)),
        &remote_config(),
        today,
    )
    .await
    .unwrap();
    laptop.add_task("Laptop task", None, None, today).unwrap();
    laptop.shutdown().await;

    let mut phone = Tracker::open_with(
        LocalStore::new(phone_dir.path(), 10),
        Some(Arc::clone(&mirror)),
        &remote_config(),
        today,
    )
    .await
    .unwrap();
    assert_eq!(phone.snapshot().tasks.len(), 1);
    phone.add_task("Phone task", None, None, today).unwrap();
    phone.shutdown().await;

    let laptop = Tracker::open_with(
        LocalStore::new(laptop_dir.path(), 10),
        Some(mirror),
        &remote_config(),
        today,
    )
    .await
    .unwrap();
    let texts: Vec<&str> = laptop.snapshot().tasks.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, vec!["Laptop task", "Phone task"]);
}

#[tokio::test]
async fn test_successful_write_clears_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let mirror = Arc::new(MemoryMirror::new());
    mirror.set_offline(true);

    let mut tracker = open(LocalStore::new(dir.path(), 10), &mirror).await;
    assert!(matches!(tracker.status(), SyncStatus::Degraded(_)));

    mirror.set_offline(false);
    tracker
        .add_task("Back online", None, None, date("2024-01-01"))
        .unwrap();
    let status = tracker.shutdown().await;

    assert!(matches!(status, SyncStatus::Connected(_)));
    assert_eq!(mirror.write_count(), 1);
}

#[tokio::test]
async fn test_dropped_subscription_stops_notifications() {
    let mirror = MemoryMirror::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = mirror.subscribe(tx).unwrap();
    drop(subscription);

    mirror.publish(RemoteDocument {
        tasks: Some(vec![task(1, "Unseen", &[])]),
        ..Default::default()
    });
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_file_mirror_watch_delivers_other_writers_changes() {
    let shared = tempfile::tempdir().unwrap();
    let watched = FileMirror::new(shared.path(), "sharedTasks", "data", DocumentLayout::Combined);
    let other = FileMirror::new(shared.path(), "sharedTasks", "data", DocumentLayout::Combined);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = watched.subscribe(tx).unwrap();

    let snapshot = Snapshot {
        tasks: vec![task(1, "From laptop", &[])],
        ..Default::default()
    };
    other.write_snapshot(&snapshot).unwrap();

    let doc = next_change(&mut rx, |d| d.tasks.as_ref().is_some_and(|t| t.len() == 1))
        .await
        .expect("change delivered");
    assert_eq!(doc.tasks.unwrap()[0].text, "From laptop");
    drain(&mut rx).await;

    // Reads, lock files and temp files are not changes.
    other.read_snapshot().unwrap();
    let collection = shared.path().join("sharedTasks");
    fs::write(collection.join(".data.lock"), "").unwrap();
    fs::write(collection.join(".data.json.tmp.99"), "{}").unwrap();
    fs::write(collection.join("notes.txt"), "unrelated").unwrap();
    assert!(timeout(Duration::from_millis(500), rx.recv()).await.is_err());
}

#[tokio::test]
async fn test_file_mirror_watch_reassembles_per_record_layout() {
    let shared = tempfile::tempdir().unwrap();
    let watched = FileMirror::new(shared.path(), "sharedTasks", "family", DocumentLayout::PerRecord);
    let other = FileMirror::new(shared.path(), "sharedTasks", "family", DocumentLayout::PerRecord);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = watched.subscribe(tx).unwrap();

    let mut snapshot = Snapshot {
        tasks: vec![task(1, "Walk", &["2024-01-01"])],
        ..Default::default()
    };
    snapshot.streak.completed_days.insert(date("2024-01-01"));
    other.write_snapshot(&snapshot).unwrap();

    let doc = next_change(&mut rx, |d| {
        d.tasks.as_ref().is_some_and(|t| t.len() == 1) && d.routine_tasks.is_some() && d.streak_data.is_some()
    })
    .await
    .expect("all records delivered");
    let streak = doc.streak_data.unwrap();
    assert_eq!(streak.completed_days.unwrap().len(), 1);
    assert_eq!(doc.routine_tasks, Some(Vec::new()));
}
