//! Engine configuration.
//!
//! Plain structs with explicit defaults. All thresholds that gate maintenance
//! work (splitting, compaction, debounce, rotation) live here so tests can
//! shrink them.

use std::path::PathBuf;
use std::time::Duration;

use crate::index::IndexKind;

/// Tunables for the compaction trigger.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Compact when `deleted / total` exceeds this ratio.
    pub max_deleted_ratio: f64,
    /// Compact when the chunk count exceeds this.
    pub max_chunks: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_deleted_ratio: 0.3,
            max_chunks: 50,
        }
    }
}

/// Declares one index over a collection field.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub field: String,
    pub kind: IndexKind,
}

impl IndexSpec {
    pub fn new(field: impl Into<String>, kind: IndexKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Active data location at startup.
    pub root: PathBuf,
    /// Maximum records per chunk. An insert that pushes a chunk past this
    /// triggers an immediate split.
    pub chunk_capacity: usize,
    /// Upper bound on a single serialized record. A record larger than this
    /// is rejected with a capacity error before any write happens.
    pub max_record_bytes: usize,
    pub compaction: CompactionConfig,
    /// Debounce window for autosave triggers. The latest scheduled save wins;
    /// earlier pending saves are cancelled.
    pub autosave_debounce: Duration,
    /// Rotation limit: oldest backups beyond this count are pruned.
    pub max_backups: usize,
    /// Indexes registered for every collection when it is first opened.
    pub index_specs: Vec<IndexSpec>,
}

impl EngineConfig {
    /// Configuration with defaults suitable for a personal-scale store.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_capacity: 1000,
            max_record_bytes: 1024 * 1024,
            compaction: CompactionConfig::default(),
            autosave_debounce: Duration::from_millis(2000),
            max_backups: 10,
            index_specs: vec![
                IndexSpec::new("status", IndexKind::Hash),
                IndexSpec::new("column", IndexKind::Hash),
                IndexSpec::new("folder", IndexKind::Hash),
                IndexSpec::new("due_date", IndexKind::Range),
                IndexSpec::new("updated_at", IndexKind::Range),
                IndexSpec::new("title", IndexKind::Fulltext),
                IndexSpec::new("body", IndexKind::Fulltext),
            ],
        }
    }
}
