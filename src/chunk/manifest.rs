//! The chunk manifest: the single source of truth for a collection's current
//! storage generation.
//!
//! The manifest lists chunk ids in order with per-chunk counts and dirty
//! flags. Compaction builds a whole new set of chunk files and then commits
//! by atomically rewriting this file; readers holding the previous manifest
//! keep reading the previous generation's files untouched.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{ChunkError, ChunkResult};
use crate::fsx;

/// Per-chunk metadata as recorded in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub chunk_id: u64,
    /// Total items including soft-deleted ones.
    pub items: usize,
    /// Items with the deleted flag unset.
    pub live: usize,
    #[serde(default)]
    pub dirty: bool,
}

/// Ordered chunk list plus counters for one collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Monotonic generation number, bumped on every compaction swap.
    pub generation: u64,
    /// Next chunk id to hand out. Never reused within a collection.
    pub next_chunk_id: u64,
    pub chunks: Vec<ManifestEntry>,
    pub updated_at: DateTime<Utc>,
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            generation: 0,
            next_chunk_id: 1,
            chunks: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Loads a manifest, or `None` when the collection has never been saved.
    pub fn load(path: &Path) -> ChunkResult<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChunkError::io(path, e)),
        };
        let manifest = serde_json::from_slice(&bytes)
            .map_err(|e| ChunkError::malformed(path, e.to_string()))?;
        Ok(Some(manifest))
    }

    /// Atomically replaces the manifest file.
    pub fn store(&mut self, path: &Path) -> ChunkResult<()> {
        self.updated_at = Utc::now();
        fsx::atomic_write_json(path, self).map_err(|e| ChunkError::io(path, e))
    }

    pub fn entry_mut(&mut self, chunk_id: u64) -> Option<&mut ManifestEntry> {
        self.chunks.iter_mut().find(|e| e.chunk_id == chunk_id)
    }

    pub fn contains(&self, chunk_id: u64) -> bool {
        self.chunks.iter().any(|e| e.chunk_id == chunk_id)
    }

    pub fn allocate_chunk_id(&mut self) -> u64 {
        let id = self.next_chunk_id;
        self.next_chunk_id += 1;
        id
    }

    pub fn total_items(&self) -> usize {
        self.chunks.iter().map(|e| e.items).sum()
    }

    pub fn live_items(&self) -> usize {
        self.chunks.iter().map(|e| e.live).sum()
    }

    pub fn deleted_items(&self) -> usize {
        self.total_items() - self.live_items()
    }

    /// Fraction of items that are soft-deleted, in `[0, 1]`.
    pub fn deleted_ratio(&self) -> f64 {
        let total = self.total_items();
        if total == 0 {
            0.0
        } else {
            self.deleted_items() as f64 / total as f64
        }
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}
