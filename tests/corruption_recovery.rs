//! Corruption detection and automatic backup fallback.
//!
//! Every chunk read re-verifies its CRC32. When a collection fails its
//! checksum at open and a verified backup exists, the engine restores from
//! it automatically and surfaces a warning instead of failing the read.

use chunkdb::{BackupKind, Engine, EngineConfig, Entity, QueryOptions, Record};
use tempfile::TempDir;

fn config(root: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::new(root);
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

fn corrupt_first_chunk(root: &std::path::Path) {
    let chunks = root.join("tasks").join("chunks");
    let mut entries: Vec<_> = std::fs::read_dir(&chunks)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    entries.sort();
    let path = &entries[0];
    let contents = std::fs::read_to_string(path).unwrap();
    std::fs::write(path, contents.replace("alpha", "ALPHA")).unwrap();
}

/// A flipped byte inside a chunk fails the open; with a verified backup on
/// hand the engine restores and keeps serving.
#[test]
fn corrupted_collection_recovers_from_verified_backup() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine
        .save("tasks", &[task("t-1", "alpha"), task("t-2", "beta")])
        .unwrap();
    engine.create_backup(BackupKind::Manual, None).unwrap();
    engine.shutdown().unwrap();

    corrupt_first_chunk(dir.path());

    let engine = Engine::initialize(config(dir.path())).unwrap();
    let loaded = engine.load("tasks", &QueryOptions::default()).unwrap();
    assert!(
        !loaded.warnings.is_empty(),
        "the fallback must be reported, not silent"
    );
    assert_eq!(loaded.items.len(), 2);
    let t1 = loaded.items.iter().find(|r| r.id == "t-1").unwrap();
    assert_eq!(t1.field("title"), Some(serde_json::json!("alpha")));
    engine.shutdown().unwrap();
}

/// A backup taken over already-corrupt chunks never gets marked verified:
/// the read-back check recomputes each chunk file's embedded checksum, not
/// just the aggregate over the copied bytes. Restoring such a snapshot is
/// refused, and the automatic fallback never picks it.
#[test]
fn backup_of_corrupt_data_is_never_verified() {
    use chunkdb::backup::BackupError;
    use chunkdb::EngineError;

    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine
        .save("tasks", &[task("t-1", "alpha"), task("t-2", "beta")])
        .unwrap();
    engine.shutdown().unwrap();

    corrupt_first_chunk(dir.path());

    let engine = Engine::initialize(config(dir.path())).unwrap();
    let info = engine.create_backup(BackupKind::Manual, None).unwrap();
    assert!(
        !info.verified,
        "a snapshot of corrupt chunks must not verify"
    );

    let err = engine.restore_from_backup(&info.id, true).unwrap_err();
    assert!(
        matches!(
            err,
            EngineError::Backup(BackupError::InvalidSnapshot { .. })
        ),
        "got {}",
        err
    );

    // With no verified backup to fall back on, the corruption surfaces
    // instead of silently restoring corrupt data.
    let err = engine.load("tasks", &QueryOptions::default()).unwrap_err();
    assert!(err.is_corruption(), "got {}", err);
    engine.shutdown().unwrap();
}

/// Without any verified backup the corruption error propagates.
#[test]
fn corruption_without_backup_is_an_error() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine.save("tasks", &[task("t-1", "alpha")]).unwrap();
    engine.shutdown().unwrap();

    corrupt_first_chunk(dir.path());

    let engine = Engine::initialize(config(dir.path())).unwrap();
    let err = engine.load("tasks", &QueryOptions::default()).unwrap_err();
    assert!(err.is_corruption(), "got {}", err);
    engine.shutdown().unwrap();
}
