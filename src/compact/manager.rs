//! Compaction pass.
//!
//! Reads all live records, rewrites them into freshly sized chunks, rebuilds
//! the indexes, and commits with a single atomic manifest swap. In-flight
//! readers keep the pre-compaction generation through the unchanged manifest
//! until the swap; an interrupted run leaves the manifest untouched, so a
//! retry redoes the remaining work without duplicating or losing records.

use chrono::{DateTime, Utc};

use super::CompactResult;
use crate::chunk::{ChunkStore, GenerationSwap, Manifest, PreparedGeneration};
use crate::config::CompactionConfig;
use crate::index::IndexManager;
use crate::observability::Logger;

/// What one compaction pass did.
#[derive(Debug, Clone, Copy)]
pub struct CompactionReport {
    pub live_records: usize,
    pub reclaimed_records: usize,
    pub chunks_before: usize,
    pub chunks_after: usize,
    pub generation: u64,
    pub finished_at: DateTime<Utc>,
}

/// Decides when to compact and runs the pass.
pub struct CompactionManager {
    config: CompactionConfig,
}

impl CompactionManager {
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    /// Trigger rule: deleted-ratio or chunk-count threshold exceeded.
    pub fn should_compact(&self, manifest: &Manifest) -> bool {
        if manifest.total_items() == 0 {
            return false;
        }
        manifest.deleted_ratio() > self.config.max_deleted_ratio
            || manifest.chunks.len() > self.config.max_chunks
    }

    /// Runs one pass over a collection. Idempotent: running it again on the
    /// result is a no-op swap of an identical record set.
    pub fn compact(
        &self,
        store: &mut ChunkStore,
        indexes: &mut IndexManager,
    ) -> CompactResult<CompactionReport> {
        let reclaimed = store.manifest().deleted_items();
        let live = store.live_records()?;
        let live_count = live.len();
        let swap = store.replace_generation(live)?;
        self.finish(store, indexes, live_count, reclaimed, swap)
    }

    /// Commit half of a staged compaction: swaps the manifest and rebuilds the
    /// indexes. The caller writes the new generation's files beforehand with
    /// `ChunkStore::prepare_generation`, typically without holding the store's
    /// lock. Returns `None` when the plan went stale and nothing changed.
    pub fn commit(
        &self,
        store: &mut ChunkStore,
        indexes: &mut IndexManager,
        prepared: PreparedGeneration,
    ) -> CompactResult<Option<CompactionReport>> {
        let reclaimed = store.manifest().deleted_items();
        let Some(swap) = store.commit_generation(prepared)? else {
            return Ok(None);
        };
        let live_count = store.manifest().live_items();
        self.finish(store, indexes, live_count, reclaimed, swap).map(Some)
    }

    fn finish(
        &self,
        store: &mut ChunkStore,
        indexes: &mut IndexManager,
        live_count: usize,
        reclaimed: usize,
        swap: GenerationSwap,
    ) -> CompactResult<CompactionReport> {
        // The swapped generation holds no tombstones; rebuild from it.
        let rebuilt = store.live_records()?;
        indexes.rebuild(rebuilt.iter());
        indexes.persist()?;

        let report = CompactionReport {
            live_records: live_count,
            reclaimed_records: reclaimed,
            chunks_before: swap.chunks_before,
            chunks_after: swap.chunks_after,
            generation: swap.generation,
            finished_at: Utc::now(),
        };
        Logger::info(
            "compaction_finished",
            &[
                ("live", &report.live_records.to_string()),
                ("reclaimed", &report.reclaimed_records.to_string()),
                ("chunks_before", &report.chunks_before.to_string()),
                ("chunks_after", &report.chunks_after.to_string()),
                ("generation", &report.generation.to_string()),
            ],
        );
        Ok(report)
    }
}
