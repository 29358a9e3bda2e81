//! Backup and restore invariants.
//!
//! 1. A fresh backup verifies by read-back before it is trusted.
//! 2. Restore requires explicit confirmation and never discards the current
//!    state silently: a safety backup is taken first.
//! 3. A restore brings back exactly the backed-up state.

use chunkdb::backup::BackupError;
use chunkdb::{BackupKind, Engine, EngineConfig, EngineError, Entity, QueryOptions, Record};
use tempfile::TempDir;

fn config(root: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::new(root);
    config.chunk_capacity = 8;
    config.compaction.max_deleted_ratio = 1.0;
    config.compaction.max_chunks = usize::MAX;
    config
}

fn task(id: &str, title: &str) -> Record {
    Record::new(
        id,
        Entity::Task {
            title: title.to_string(),
            column: "todo".to_string(),
            status: "open".to_string(),
            description: String::new(),
            priority: None,
            due_date: None,
            tags: Vec::new(),
        },
    )
}

/// A backup created from a healthy store passes read-back verification.
#[test]
fn fresh_backup_is_verified() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine.save("tasks", &[task("t-1", "alpha")]).unwrap();

    let info = engine
        .create_backup(BackupKind::Manual, Some("before refactor".to_string()))
        .unwrap();
    assert!(info.verified, "read-back verification must pass");
    assert!(info.size_bytes > 0);
    assert!(info.checksum.starts_with("crc32:"));

    let listed = engine.list_backups().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, info.id);
    engine.shutdown().unwrap();
}

/// Restore without confirmation is refused outright.
#[test]
fn restore_requires_confirmation() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine.save("tasks", &[task("t-1", "alpha")]).unwrap();
    let info = engine.create_backup(BackupKind::Manual, None).unwrap();

    let err = engine.restore_from_backup(&info.id, false).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Backup(BackupError::ConfirmationRequired)
    ));
    engine.shutdown().unwrap();
}

/// Restoring an unknown id fails without touching live data.
#[test]
fn restore_of_unknown_backup_fails_cleanly() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine.save("tasks", &[task("t-1", "alpha")]).unwrap();

    let err = engine.restore_from_backup("20990101T000000000Z", true).unwrap_err();
    assert!(matches!(err, EngineError::Backup(BackupError::NotFound(_))));

    let loaded = engine.load("tasks", &QueryOptions::default()).unwrap();
    assert_eq!(loaded.items.len(), 1);
    engine.shutdown().unwrap();
}

/// A confirmed restore brings back the backed-up state and preserves the
/// pre-restore state as an automatic safety backup.
#[test]
fn restore_round_trip_with_safety_backup() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine
        .save("tasks", &[task("t-1", "alpha"), task("t-2", "beta")])
        .unwrap();
    let info = engine.create_backup(BackupKind::Manual, None).unwrap();

    // Diverge: rename one task, drop the other, add a third.
    engine
        .save("tasks", &[task("t-1", "alpha renamed"), task("t-3", "gamma")])
        .unwrap();

    let outcome = engine.restore_from_backup(&info.id, true).unwrap();
    assert!(outcome.success, "errors: {:?}", outcome.errors);
    assert_eq!(outcome.migrated_items, 2);

    let loaded = engine.load("tasks", &QueryOptions::default()).unwrap();
    let mut ids: Vec<&str> = loaded.items.iter().map(|r| r.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["t-1", "t-2"]);
    let t1 = loaded.items.iter().find(|r| r.id == "t-1").unwrap();
    assert_eq!(t1.field("title"), Some(serde_json::json!("alpha")));

    // The diverged state survived as an auto backup.
    let backups = engine.list_backups().unwrap();
    assert_eq!(backups.len(), 2);
    assert!(backups.iter().any(|b| b.kind == BackupKind::Auto));
    engine.shutdown().unwrap();
}

/// Saving after a restore works against the restored baseline, not the
/// pre-restore one.
#[test]
fn change_tracking_rebaselines_after_restore() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine.save("tasks", &[task("t-1", "alpha")]).unwrap();
    let info = engine.create_backup(BackupKind::Manual, None).unwrap();

    engine.save("tasks", &[task("t-1", "edited")]).unwrap();
    engine.restore_from_backup(&info.id, true).unwrap();

    // The restored title is "alpha"; saving it again must be a no-op.
    let outcome = engine.save("tasks", &[task("t-1", "alpha")]).unwrap();
    assert!(outcome.skipped);
    engine.shutdown().unwrap();
}

/// A leftover `<collection>.old` directory from an interrupted restore swap
/// is not a collection: stats, integrity checks and backups all skip it.
#[test]
fn leftover_swap_directories_are_not_collections() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine
        .save("tasks", &[task("t-1", "alpha"), task("t-2", "beta")])
        .unwrap();

    // Simulate a swap that died after moving the live directory aside.
    let stale = dir.path().join("tasks.old");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::copy(
        dir.path().join("tasks/manifest.json"),
        stale.join("manifest.json"),
    )
    .unwrap();

    let stats = engine.get_stats().unwrap();
    assert_eq!(stats.collections.len(), 1);
    assert_eq!(stats.collections[0].collection, "tasks");

    let report = engine.perform_integrity_check().unwrap();
    assert!(report.healthy, "unexpected issues: {:?}", report.issues);

    let info = engine.create_backup(BackupKind::Manual, None).unwrap();
    assert!(info.verified);
    let backup_collections = dir
        .path()
        .join("backups")
        .join(&info.id)
        .join("collections");
    assert!(backup_collections.join("tasks").is_dir());
    assert!(
        !backup_collections.join("tasks.old").exists(),
        "the stale swap directory must not be snapshotted"
    );
    engine.shutdown().unwrap();
}

/// Rotation prunes the oldest backups past the configured limit.
#[test]
fn rotation_prunes_oldest_backups() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.max_backups = 2;
    let engine = Engine::initialize(config).unwrap();
    engine.save("tasks", &[task("t-1", "alpha")]).unwrap();

    let first = engine.create_backup(BackupKind::Auto, None).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    engine.create_backup(BackupKind::Auto, None).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    engine.create_backup(BackupKind::Auto, None).unwrap();

    let backups = engine.list_backups().unwrap();
    assert_eq!(backups.len(), 2);
    assert!(
        backups.iter().all(|b| b.id != first.id),
        "the oldest backup must rotate out"
    );
    engine.shutdown().unwrap();
}
