//! Compaction invariants at the engine surface.
//!
//! Compaction runs in the background once the deleted ratio passes its
//! threshold; shutdown waits for it. A pass must preserve the live record
//! set exactly, drop every tombstone, and never grow the chunk count.

use chunkdb::{Engine, EngineConfig, Entity, QueryOptions, Record};
use tempfile::TempDir;

fn config(root: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::new(root);
    config.chunk_capacity = 4;
    config.compaction.max_deleted_ratio = 0.3;
    config
}

fn task(id: &str) -> Record {
    Record::new(
        id,
        Entity::Task {
            title: format!("task {}", id),
            column: "todo".to_string(),
            status: "open".to_string(),
            description: String::new(),
            priority: None,
            due_date: None,
            tags: Vec::new(),
        },
    )
}

/// Deleting 40% of a collection crosses the 30% threshold; after the
/// background pass completes, tombstones are gone and the live set is
/// intact.
#[test]
fn background_compaction_reclaims_tombstones() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();

    let records: Vec<Record> = (0..10).map(|i| task(&format!("t-{}", i))).collect();
    engine.save("tasks", &records).unwrap();

    let stats = engine.get_stats().unwrap();
    let chunks_before = stats.collections[0].chunk_count;

    // Keep 6 of 10: the 40% deletion crosses the trigger.
    let kept: Vec<Record> = records[4..].to_vec();
    let outcome = engine.save("tasks", &kept).unwrap();
    assert_eq!(outcome.records_deleted, 4);

    // shutdown waits for the scheduled background pass.
    engine.shutdown().unwrap();

    let engine = Engine::initialize(config(dir.path())).unwrap();
    let stats = engine.get_stats().unwrap();
    let collection = &stats.collections[0];
    assert_eq!(collection.deleted_records, 0, "tombstones must be reclaimed");
    assert_eq!(collection.live_records, 6);
    assert!(collection.chunk_count <= chunks_before);
    assert!(collection.generation >= 1, "compaction commits a new generation");

    let mut ids: Vec<String> = engine
        .load("tasks", &QueryOptions::default())
        .unwrap()
        .items
        .into_iter()
        .map(|r| r.id)
        .collect();
    ids.sort();
    let mut expected: Vec<String> = kept.iter().map(|r| r.id.clone()).collect();
    expected.sort();
    assert_eq!(ids, expected, "compaction must not lose or invent records");
    engine.shutdown().unwrap();
}

/// Below the threshold nothing compacts: tombstones stay until the ratio
/// crosses.
#[test]
fn small_deletions_do_not_trigger_compaction() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();

    let records: Vec<Record> = (0..10).map(|i| task(&format!("t-{}", i))).collect();
    engine.save("tasks", &records).unwrap();
    engine.save("tasks", &records[1..]).unwrap();
    engine.shutdown().unwrap();

    let engine = Engine::initialize(config(dir.path())).unwrap();
    let stats = engine.get_stats().unwrap();
    assert_eq!(stats.collections[0].deleted_records, 1, "10% deleted stays put");
    engine.shutdown().unwrap();
}

/// Queries issued after compaction still resolve through the rebuilt
/// indexes.
#[test]
fn indexes_survive_compaction() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::initialize(config(dir.path())).unwrap();

    let records: Vec<Record> = (0..10).map(|i| task(&format!("t-{}", i))).collect();
    engine.save("tasks", &records).unwrap();
    engine.save("tasks", &records[4..]).unwrap();
    engine.shutdown().unwrap();

    let engine = Engine::initialize(config(dir.path())).unwrap();
    let out = engine
        .load(
            "tasks",
            &QueryOptions::default().filter(
                "status",
                chunkdb::Predicate::Equals(serde_json::json!("open")),
            ),
        )
        .unwrap();
    assert_eq!(out.items.len(), 6);
    engine.shutdown().unwrap();
}
