//! Aggregate counters, persisted as `stats.json` per collection.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::Manifest;
use crate::fsx;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionStats {
    pub collection: String,
    pub total_records: usize,
    pub live_records: usize,
    pub deleted_records: usize,
    pub chunk_count: usize,
    pub generation: u64,
    /// Committed save batches since the collection was created.
    pub writes: u64,
    pub last_compaction: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CollectionStats {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            total_records: 0,
            live_records: 0,
            deleted_records: 0,
            chunk_count: 0,
            generation: 0,
            writes: 0,
            last_compaction: None,
            updated_at: Utc::now(),
        }
    }

    pub fn load(path: &Path) -> Option<Self> {
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Pulls counts from the manifest; the caller bumps `writes` and
    /// `last_compaction` itself.
    pub fn refresh_from(&mut self, manifest: &Manifest) {
        self.total_records = manifest.total_items();
        self.live_records = manifest.live_items();
        self.deleted_records = manifest.deleted_items();
        self.chunk_count = manifest.chunks.len();
        self.generation = manifest.generation;
        self.updated_at = Utc::now();
    }

    pub fn store(&self, path: &Path) -> std::io::Result<()> {
        fsx::atomic_write_json(path, self)
    }
}

/// Engine-wide view returned by `get_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub active_location: PathBuf,
    pub collections: Vec<CollectionStats>,
    pub backups: usize,
}
