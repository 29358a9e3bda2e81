//! Change detection classification through the engine surface.
//!
//! Placement-only diffs classify as moves, display-key-only diffs as
//! renames, everything else as updates. Committing a save replaces the
//! baseline wholesale, so the same state never reports twice.

use chunkdb::{ChangeKind, Engine, EngineConfig, Entity, Record};
use tempfile::TempDir;

fn config(root: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::new(root);
    config.compaction.max_deleted_ratio = 1.0;
    config.compaction.max_chunks = usize::MAX;
    config
}

fn task(id: &str, title: &str, column: &str) -> Record {
    Record::new(
        id,
        Entity::Task {
            title: title.to_string(),
            column: column.to_string(),
            status: "open".to_string(),
            description: String::new(),
            priority: None,
            due_date: None,
            tags: Vec::new(),
        },
    )
}

fn note(id: &str, title: &str, folder: &str) -> Record {
    Record::new(
        id,
        Entity::Note {
            title: title.to_string(),
            folder: folder.to_string(),
            body: "body".to_string(),
            tags: Vec::new(),
        },
    )
}

/// A column-only change on a task is a move, not an update.
#[test]
fn column_change_classifies_as_move() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine.save("tasks", &[task("t-1", "ship it", "todo")]).unwrap();

    let report = engine
        .detect_changes("tasks", &[task("t-1", "ship it", "doing")])
        .unwrap();
    assert_eq!(report.total_changes, 1);
    assert_eq!(report.by_kind.get(&ChangeKind::Move), Some(&1));
    engine.shutdown().unwrap();
}

/// A folder-only change on a note is a move; notes place by folder.
#[test]
fn folder_change_classifies_as_move() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine.save("notes", &[note("n-1", "ideas", "inbox")]).unwrap();

    let report = engine
        .detect_changes("notes", &[note("n-1", "ideas", "projects")])
        .unwrap();
    assert_eq!(report.by_kind.get(&ChangeKind::Move), Some(&1));
    engine.shutdown().unwrap();
}

/// A title-only change is a rename and carries exactly one field diff.
#[test]
fn title_change_classifies_as_rename() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine.save("tasks", &[task("t-1", "draft", "todo")]).unwrap();

    let report = engine
        .detect_changes("tasks", &[task("t-1", "final", "todo")])
        .unwrap();
    assert_eq!(report.by_kind.get(&ChangeKind::Rename), Some(&1));
    assert_eq!(report.changes[0].field_diffs.len(), 1);
    assert_eq!(report.changes[0].field_diffs[0].field, "title");
    engine.shutdown().unwrap();
}

/// A diff touching placement and anything else degrades to an update.
#[test]
fn mixed_change_classifies_as_update() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine.save("tasks", &[task("t-1", "draft", "todo")]).unwrap();

    let report = engine
        .detect_changes("tasks", &[task("t-1", "final", "doing")])
        .unwrap();
    assert_eq!(report.by_kind.get(&ChangeKind::Update), Some(&1));
    engine.shutdown().unwrap();
}

/// Detection is read-only; only a save commits the baseline.
#[test]
fn detection_does_not_commit_the_baseline() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine.save("tasks", &[task("t-1", "draft", "todo")]).unwrap();

    let edited = [task("t-1", "final", "todo")];
    assert!(engine.detect_changes("tasks", &edited).unwrap().has_uncommitted_changes);
    // Still pending: a second detection of the same edit reports it again.
    assert!(engine.detect_changes("tasks", &edited).unwrap().has_uncommitted_changes);

    engine.save("tasks", &edited).unwrap();
    assert!(!engine.detect_changes("tasks", &edited).unwrap().has_uncommitted_changes);

    let summary = engine.get_change_summary("tasks").unwrap();
    assert_eq!(summary.pending_changes, 0);
    engine.shutdown().unwrap();
}

/// Creates and deletes in one batch both land in the report and the store.
#[test]
fn create_and_delete_combine_in_one_save() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();
    engine
        .save("tasks", &[task("t-1", "keep", "todo"), task("t-2", "drop", "todo")])
        .unwrap();

    let next = [task("t-1", "keep", "todo"), task("t-3", "fresh", "todo")];
    let outcome = engine.save("tasks", &next).unwrap();
    assert_eq!(outcome.detection.by_kind.get(&ChangeKind::Create), Some(&1));
    assert_eq!(outcome.detection.by_kind.get(&ChangeKind::Delete), Some(&1));
    assert_eq!(outcome.records_written, 1);
    assert_eq!(outcome.records_deleted, 1);
    engine.shutdown().unwrap();
}
