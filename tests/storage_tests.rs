use std::fs;

use chrono::{NaiveDate, TimeZone, Utc};
use streakust::config::{Config, DocumentLayout};
use streakust::models::{RoutineTask, Snapshot, Task, TaskId};
use streakust::storage::{Key, LocalStore};
use streakust::transfer::{apply_import, export, parse_import};

fn sample() -> Snapshot {
    let day = NaiveDate::from_ymd_opt(2024, 4, 2).unwrap();
    let mut snapshot = Snapshot::default();
    snapshot.tasks.push(Task {
        id: TaskId::Int(1),
        text: "Plan week".into(),
        date: day,
        time: Some("09:00".into()),
        completed_dates: [day].into_iter().collect(),
    });
    snapshot.routine_tasks.push(RoutineTask {
        id: TaskId::Int(2),
        text: "Stretch".into(),
        time: "07:00".into(),
    });
    snapshot.streak.completed_days.insert(day);
    snapshot.streak.last_check_date = Some(day);
    snapshot.streak.start_date = Some(day);
    snapshot
}

#[test]
fn test_missing_store_loads_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = LocalStore::new(dir.path(), 10);
    let snapshot = store.load_snapshot();
    assert_eq!(snapshot, Snapshot::default());
    assert_eq!(store.save_count(), 0);
    assert!(store.last_save().is_none());
    assert!(store.load_backup().is_none());
}

#[test]
fn test_save_and_reload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = LocalStore::new(dir.path(), 10);
    let now = Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).unwrap();

    let receipt = store.save_snapshot(&sample(), now).unwrap();
    assert_eq!(receipt.count, 1);
    assert!(!receipt.backed_up);

    assert_eq!(store.load_snapshot(), sample());
    assert_eq!(store.last_save(), Some(now));
    assert!(dir.path().join(Key::Streak.file_name()).exists());
}

#[test]
fn test_backup_every_tenth_save() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = LocalStore::new(dir.path(), 10);
    let now = Utc::now();

    for i in 1..=9 {
        let receipt = store.save_snapshot(&Snapshot::default(), now).unwrap();
        assert_eq!(receipt.count, i);
        assert!(!receipt.backed_up);
    }
    assert!(store.load_backup().is_none());

    let receipt = store.save_snapshot(&sample(), now).unwrap();
    assert_eq!(receipt.count, 10);
    assert!(receipt.backed_up);
    assert_eq!(store.load_backup(), Some(sample()));
}

#[test]
fn test_corrupt_record_loads_as_default() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = LocalStore::new(dir.path(), 10);
    store.save_snapshot(&sample(), Utc::now()).unwrap();
    fs::write(dir.path().join(Key::Tasks.file_name()), "{ not json").unwrap();

    let snapshot = store.load_snapshot();
    assert!(snapshot.tasks.is_empty());
    assert_eq!(snapshot.routine_tasks.len(), 1);
}

#[test]
fn test_reads_browser_era_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join(Key::Tasks.file_name()),
        r#"[{"id":1717000000000.5,"text":"Yoga","date":"2024-05-29","time":"06:00","completedDates":[]}]"#,
    )
    .unwrap();
    fs::write(
        dir.path().join(Key::Streak.file_name()),
        r#"{"startDate":"2024-05-29","currentDay":1,"completedDays":[],"lastCheckDate":null}"#,
    )
    .unwrap();

    let snapshot = LocalStore::new(dir.path(), 10).load_snapshot();
    assert_eq!(snapshot.tasks[0].id, TaskId::Float(1717000000000.5));
    assert_eq!(snapshot.streak.start_date, NaiveDate::from_ymd_opt(2024, 5, 29));
}

#[test]
fn test_export_import_replaces_state() {
    let exported = export(&sample(), Utc::now());
    let raw = serde_json::to_string(&exported).unwrap();
    assert!(raw.contains("\"version\":\"1.0\""));
    assert!(raw.contains("\"streakData\""));

    let mut target = Snapshot::default();
    target.tasks.push(Task {
        id: TaskId::Int(99),
        text: "Will be replaced".into(),
        date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        time: None,
        completed_dates: Default::default(),
    });
    apply_import(&mut target, parse_import(&raw).unwrap());
    assert_eq!(target, sample());
}

#[test]
fn test_import_without_optional_records_keeps_them() {
    let mut target = sample();
    apply_import(&mut target, parse_import(r#"{"tasks":[]}"#).unwrap());
    assert!(target.tasks.is_empty());
    assert_eq!(target.routine_tasks.len(), 1);
    assert_eq!(target.streak.completed_days.len(), 1);
}

#[test]
fn test_import_rejects_bad_files() {
    for raw in ["not json", "{}", r#"{"tasks":{}}"#, r#"{"tasks":[{"id":1}]}"#] {
        let err = parse_import(raw).unwrap_err();
        assert!(matches!(err, streakust::Error::Format(_)), "accepted {}", raw);
    }
}

#[test]
fn test_config_defaults_when_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    fs::write(&path, "").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.storage.backup_every, 10);
    assert!(config.storage.data_dir.is_none());
    assert_eq!(config.remote.collection, "sharedTasks");
    assert_eq!(config.remote.document, "data");
    assert_eq!(config.remote.layout, DocumentLayout::Combined);
    assert_eq!(config.remote.outbox_capacity, 16);
}

#[test]
fn test_config_overrides_from_toml() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");
    let toml = r#"
[storage]
backup_every = 5

[remote]
enabled = true
root = "/mnt/shared"
document = "family"
layout = "per-record"
write_retries = 0
"#;
    fs::write(&path, toml)?;

    let config = Config::load(&path)?;
    assert_eq!(config.storage.backup_every, 5);
    assert!(config.remote.enabled);
    assert_eq!(config.remote.document, "family");
    assert_eq!(config.remote.layout, DocumentLayout::PerRecord);
    assert_eq!(config.remote.write_retries, 0);
    Ok(())
}

#[test]
fn test_config_rejects_invalid_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");

    fs::write(&path, "[storage]\nbackup_every = 0\n").unwrap();
    assert!(Config::load(&path).is_err());

    fs::write(&path, "[remote]\nenabled = true\n").unwrap();
    assert!(Config::load(&path).is_err());

    fs::write(&path, "this = [not valid").unwrap();
    assert!(Config::load(&path).is_err());
}

#[test]
fn test_config_save_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.storage.backup_every = 3;
    config.remote.layout = DocumentLayout::PerRecord;
    config.save(&path)?;

    let raw = fs::read_to_string(&path)?;
    assert!(raw.contains("layout = \"per-record\""));
    let loaded = Config::load(&path)?;
    assert_eq!(loaded.storage.backup_every, 3);
    assert_eq!(loaded.remote.layout, DocumentLayout::PerRecord);
    Ok(())
}
