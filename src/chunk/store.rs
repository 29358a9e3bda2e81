//! Durable chunk store.
//!
//! Records live in bounded chunks persisted as JSON files under
//! `<collection>/chunks/`. Every chunk write goes to a temporary file that is
//! atomically renamed over the previous version, so a crash mid-write leaves
//! the prior generation intact and readers never observe a half-written
//! chunk. The manifest is the sole source of truth for which chunk files
//! belong to the current generation; files not listed there are leftovers
//! from an interrupted compaction and are garbage-collected.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::chunk::Chunk;
use super::errors::{ChunkError, ChunkResult};
use super::manifest::{Manifest, ManifestEntry};
use crate::checksum::{compute_checksum, format_checksum, parse_checksum, verify_checksum};
use crate::fsx;
use crate::record::Record;

/// On-disk chunk file format. The checksum covers the canonical (sorted-key)
/// JSON serialization of `items`, which `serde_json::Value` produces on both
/// the write and the read path.
#[derive(Serialize, Deserialize)]
struct ChunkEnvelope {
    chunk_id: u64,
    checksum: String,
    items: Value,
}

/// Counters returned from an upsert batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpsertOutcome {
    pub created: usize,
    pub updated: usize,
    pub chunks_written: usize,
}

/// Outcome of a generation swap (compaction commit).
#[derive(Debug, Clone, Copy)]
pub struct GenerationSwap {
    pub chunks_before: usize,
    pub chunks_after: usize,
    pub generation: u64,
}

/// New-generation chunk files staged on disk but not yet referenced by any
/// manifest. Worthless until committed; the orphan sweep reclaims the files
/// if the plan is abandoned.
pub struct PreparedGeneration {
    chunks: Vec<Chunk>,
    next_chunk_id: u64,
    /// `updated_at` of the manifest the plan was built against.
    based_on: DateTime<Utc>,
}

/// Streaming walk over a collection's chunks in manifest order. Chunks load
/// from disk one at a time as the cursor reaches them.
pub struct ChunkCursor<'a> {
    store: &'a mut ChunkStore,
    ids: Vec<u64>,
    position: usize,
}

impl ChunkCursor<'_> {
    /// The next chunk, or `None` once the manifest is exhausted.
    pub fn next_chunk(&mut self) -> ChunkResult<Option<&Chunk>> {
        let Some(&id) = self.ids.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        self.store.ensure_loaded(id)?;
        Ok(self.store.resident.get(&id))
    }
}

/// Durable, bounded-size partitions of one collection's records.
///
/// Single logical writer; chunks are loaded lazily and cached for the life
/// of the store.
pub struct ChunkStore {
    dir: PathBuf,
    capacity: usize,
    max_record_bytes: usize,
    manifest: Manifest,
    resident: HashMap<u64, Chunk>,
    /// record id -> owning chunk id, rebuilt at open by scanning chunks.
    locations: HashMap<String, u64>,
}

impl ChunkStore {
    /// Opens the store rooted at `dir`, creating an empty one if the
    /// collection has never been saved.
    pub fn open(dir: impl Into<PathBuf>, capacity: usize, max_record_bytes: usize) -> ChunkResult<Self> {
        let dir = dir.into();
        let chunks_dir = dir.join("chunks");
        fs::create_dir_all(&chunks_dir).map_err(|e| ChunkError::io(&chunks_dir, e))?;

        let manifest = Manifest::load(&dir.join("manifest.json"))?.unwrap_or_default();

        let mut store = Self {
            dir,
            capacity: capacity.max(1),
            max_record_bytes,
            manifest,
            resident: HashMap::new(),
            locations: HashMap::new(),
        };
        store.rebuild_locations()?;
        store.remove_orphan_chunk_files()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn chunk_of(&self, record_id: &str) -> Option<u64> {
        self.locations.get(record_id).copied()
    }

    pub fn contains_record(&self, record_id: &str) -> bool {
        self.locations.contains_key(record_id)
    }

    /// Inserts or replaces a batch of records.
    ///
    /// Oversized records are rejected before any state changes, so a failed
    /// batch has no side effects. Inserts fill the tail chunk to capacity and
    /// then spill into a fresh one, so a bulk load leaves every chunk full
    /// except the last. Growth inside an interior chunk rebalances by
    /// half-split instead.
    pub fn upsert(&mut self, records: Vec<Record>) -> ChunkResult<UpsertOutcome> {
        for record in &records {
            let size = serde_json::to_vec(record)
                .map_err(|e| ChunkError::malformed(&self.dir, e.to_string()))?
                .len();
            if size > self.max_record_bytes {
                return Err(ChunkError::Capacity {
                    id: record.id.clone(),
                    size,
                    limit: self.max_record_bytes,
                });
            }
        }

        let mut outcome = UpsertOutcome::default();
        for record in records {
            match self.locations.get(&record.id).copied() {
                Some(chunk_id) => {
                    self.ensure_loaded(chunk_id)?;
                    let chunk = self
                        .resident
                        .get_mut(&chunk_id)
                        .ok_or(ChunkError::UnknownChunk(chunk_id))?;
                    let overflowed = if let Some(slot) = chunk.get_mut(&record.id) {
                        *slot = record;
                        false
                    } else {
                        // Location map pointed at a chunk missing the record;
                        // re-home it and rebalance if that overflows.
                        chunk.items.push(record);
                        chunk.len() > self.capacity
                    };
                    chunk.dirty = true;
                    outcome.updated += 1;
                    if overflowed {
                        self.split_chunk(chunk_id)?;
                    }
                }
                None => {
                    let chunk_id = self.tail_chunk_for_insert()?;
                    let record_id = record.id.clone();
                    let chunk = self
                        .resident
                        .get_mut(&chunk_id)
                        .ok_or(ChunkError::UnknownChunk(chunk_id))?;
                    chunk.items.push(record);
                    chunk.dirty = true;
                    self.locations.insert(record_id, chunk_id);
                    outcome.created += 1;
                }
            }
        }

        outcome.chunks_written = self.flush()?;
        Ok(outcome)
    }

    /// Soft-deletes records by id: the deleted flag is set, the record stays
    /// in its chunk and indexes keep a tombstone until compaction reclaims
    /// it. Unknown ids are ignored.
    pub fn soft_delete(&mut self, ids: &[String]) -> ChunkResult<usize> {
        let mut deleted = 0;
        for id in ids {
            let Some(chunk_id) = self.locations.get(id).copied() else {
                continue;
            };
            self.ensure_loaded(chunk_id)?;
            let chunk = self
                .resident
                .get_mut(&chunk_id)
                .ok_or(ChunkError::UnknownChunk(chunk_id))?;
            if let Some(record) = chunk.get_mut(id) {
                if !record.deleted {
                    record.deleted = true;
                    record.updated_at = chrono::Utc::now();
                    chunk.dirty = true;
                    deleted += 1;
                }
            }
        }
        if deleted > 0 {
            self.flush()?;
        }
        Ok(deleted)
    }

    /// Loads (if needed) and returns one chunk.
    pub fn get_chunk(&mut self, chunk_id: u64) -> ChunkResult<&Chunk> {
        if !self.manifest.contains(chunk_id) {
            return Err(ChunkError::UnknownChunk(chunk_id));
        }
        self.ensure_loaded(chunk_id)?;
        Ok(&self.resident[&chunk_id])
    }

    /// Returns one record by id, including soft-deleted ones.
    pub fn get_record(&mut self, record_id: &str) -> ChunkResult<Option<Record>> {
        let Some(chunk_id) = self.locations.get(record_id).copied() else {
            return Ok(None);
        };
        self.ensure_loaded(chunk_id)?;
        Ok(self.resident[&chunk_id].get(record_id).cloned())
    }

    /// Walks chunks in manifest order without loading the whole store up
    /// front; each chunk is read from disk as the cursor reaches it. Queries
    /// that only need a known id set should use `chunk_of` + `get_chunk`
    /// instead.
    pub fn iterate_chunks(&mut self) -> ChunkCursor<'_> {
        let ids = self.manifest.chunks.iter().map(|e| e.chunk_id).collect();
        ChunkCursor {
            store: self,
            ids,
            position: 0,
        }
    }

    /// All live (non-deleted) records in manifest order.
    pub fn live_records(&mut self) -> ChunkResult<Vec<Record>> {
        let mut out = Vec::with_capacity(self.manifest.live_items());
        let mut cursor = self.iterate_chunks();
        while let Some(chunk) = cursor.next_chunk()? {
            out.extend(chunk.items.iter().filter(|r| !r.deleted).cloned());
        }
        Ok(out)
    }

    /// Packs `live` into fresh capacity-sized chunks and writes their files.
    ///
    /// Pure staging: the manifest and the current generation stay untouched,
    /// so this can run while other readers use the store. `based_on` is the
    /// `updated_at` of the manifest the caller planned against;
    /// `commit_generation` refuses the plan if the manifest has moved since.
    pub fn prepare_generation(
        dir: &Path,
        capacity: usize,
        next_chunk_id: u64,
        based_on: DateTime<Utc>,
        live: Vec<Record>,
    ) -> ChunkResult<PreparedGeneration> {
        let capacity = capacity.max(1);
        let mut next_id = next_chunk_id;
        let mut chunks: Vec<Chunk> = Vec::new();
        for record in live {
            let needs_new = chunks
                .last()
                .map(|c: &Chunk| c.len() >= capacity)
                .unwrap_or(true);
            if needs_new {
                chunks.push(Chunk::new(next_id));
                next_id += 1;
            }
            if let Some(chunk) = chunks.last_mut() {
                chunk.items.push(record);
            }
        }

        // The old manifest is untouched, so readers and a crashed retry both
        // still see the old generation.
        for chunk in &chunks {
            Self::write_chunk_file_at(dir, chunk)?;
        }

        Ok(PreparedGeneration {
            chunks,
            next_chunk_id: next_id,
            based_on,
        })
    }

    /// Commits a staged generation if the manifest is still the one the plan
    /// was built against. Returns `None` (and discards the staged files) when
    /// a write landed in between; the caller re-plans or waits for the next
    /// trigger.
    pub fn commit_generation(
        &mut self,
        prepared: PreparedGeneration,
    ) -> ChunkResult<Option<GenerationSwap>> {
        if self.manifest.updated_at != prepared.based_on {
            for chunk in &prepared.chunks {
                // A racing insert may have claimed the same id for a real
                // chunk; never remove a file the manifest references.
                if self.manifest.contains(chunk.chunk_id) {
                    continue;
                }
                let _ = fs::remove_file(Self::chunk_path(&self.dir, chunk.chunk_id));
            }
            return Ok(None);
        }
        self.install_generation(prepared).map(Some)
    }

    /// Commits a new generation holding exactly `live` records, packed into
    /// fresh chunks.
    ///
    /// All new chunk files are written before the manifest swap; the swap is
    /// a single atomic rename, so an interruption at any point leaves the
    /// manifest pointing at the last fully-swapped generation. Retired and
    /// orphaned chunk files are removed only after the swap commits.
    pub fn replace_generation(&mut self, live: Vec<Record>) -> ChunkResult<GenerationSwap> {
        let prepared = Self::prepare_generation(
            &self.dir,
            self.capacity,
            self.manifest.next_chunk_id,
            self.manifest.updated_at,
            live,
        )?;
        self.install_generation(prepared)
    }

    /// Atomic manifest swap: the commit point of a generation change.
    fn install_generation(&mut self, prepared: PreparedGeneration) -> ChunkResult<GenerationSwap> {
        let chunks_before = self.manifest.chunks.len();

        let mut manifest = Manifest {
            generation: self.manifest.generation + 1,
            next_chunk_id: prepared.next_chunk_id,
            chunks: prepared
                .chunks
                .iter()
                .map(|c| ManifestEntry {
                    chunk_id: c.chunk_id,
                    items: c.len(),
                    live: c.live_count(),
                    dirty: false,
                })
                .collect(),
            updated_at: Utc::now(),
        };
        manifest.store(&self.dir.join("manifest.json"))?;
        self.manifest = manifest;

        // Retire everything the new manifest does not reference.
        self.resident.clear();
        for chunk in prepared.chunks {
            self.resident.insert(chunk.chunk_id, chunk);
        }
        self.locations.clear();
        for chunk in self.resident.values() {
            for record in &chunk.items {
                self.locations.insert(record.id.clone(), chunk.chunk_id);
            }
        }
        self.remove_orphan_chunk_files()?;

        Ok(GenerationSwap {
            chunks_before,
            chunks_after: self.manifest.chunks.len(),
            generation: self.manifest.generation,
        })
    }

    /// Writes dirty chunks and the manifest. Returns the number of chunk
    /// files written.
    pub fn flush(&mut self) -> ChunkResult<usize> {
        let dirty_ids: Vec<u64> = self
            .resident
            .values()
            .filter(|c| c.dirty)
            .map(|c| c.chunk_id)
            .collect();

        for chunk_id in &dirty_ids {
            let chunk = &self.resident[chunk_id];
            Self::write_chunk_file_at(&self.dir, chunk)?;
        }
        for chunk_id in &dirty_ids {
            let Some(chunk) = self.resident.get_mut(chunk_id) else {
                continue;
            };
            chunk.dirty = false;
            let (items, live) = (chunk.len(), chunk.live_count());
            if let Some(entry) = self.manifest.entry_mut(*chunk_id) {
                entry.items = items;
                entry.live = live;
                // Manifest-level dirty flags chunks compaction should visit:
                // tombstones present or badly underfilled.
                entry.dirty = items != live || items < self.capacity / 2;
            }
        }

        if !dirty_ids.is_empty() {
            self.manifest.store(&self.dir.join("manifest.json"))?;
        }
        Ok(dirty_ids.len())
    }

    /// The chunk new inserts land in: the current tail while it has room,
    /// otherwise a freshly opened one.
    fn tail_chunk_for_insert(&mut self) -> ChunkResult<u64> {
        if let Some(id) = self.manifest.chunks.last().map(|e| e.chunk_id) {
            self.ensure_loaded(id)?;
            let has_room = self
                .resident
                .get(&id)
                .map(|c| c.len() < self.capacity)
                .unwrap_or(false);
            if has_room {
                return Ok(id);
            }
        }
        let id = self.manifest.allocate_chunk_id();
        self.manifest.chunks.push(ManifestEntry {
            chunk_id: id,
            items: 0,
            live: 0,
            dirty: false,
        });
        self.resident.insert(id, Chunk::new(id));
        Ok(id)
    }

    fn split_chunk(&mut self, chunk_id: u64) -> ChunkResult<()> {
        let new_id = self.manifest.allocate_chunk_id();
        let new_chunk = {
            let chunk = self
                .resident
                .get_mut(&chunk_id)
                .ok_or(ChunkError::UnknownChunk(chunk_id))?;
            chunk.split(new_id)
        };
        for record in &new_chunk.items {
            self.locations.insert(record.id.clone(), new_id);
        }
        let position = self
            .manifest
            .chunks
            .iter()
            .position(|e| e.chunk_id == chunk_id)
            .map(|p| p + 1)
            .unwrap_or(self.manifest.chunks.len());
        self.manifest.chunks.insert(
            position,
            ManifestEntry {
                chunk_id: new_id,
                items: new_chunk.len(),
                live: new_chunk.live_count(),
                dirty: false,
            },
        );
        self.resident.insert(new_id, new_chunk);
        Ok(())
    }

    fn ensure_loaded(&mut self, chunk_id: u64) -> ChunkResult<()> {
        if self.resident.contains_key(&chunk_id) {
            return Ok(());
        }
        let chunk = self.read_chunk_file(chunk_id)?;
        self.resident.insert(chunk_id, chunk);
        Ok(())
    }

    fn chunk_path(dir: &Path, chunk_id: u64) -> PathBuf {
        dir.join("chunks").join(format!("chunk_{}.json", chunk_id))
    }

    fn read_chunk_file(&self, chunk_id: u64) -> ChunkResult<Chunk> {
        let path = Self::chunk_path(&self.dir, chunk_id);
        let bytes = fs::read(&path).map_err(|e| ChunkError::io(&path, e))?;
        let envelope: ChunkEnvelope =
            serde_json::from_slice(&bytes).map_err(|e| ChunkError::malformed(&path, e.to_string()))?;

        let canonical = serde_json::to_vec(&envelope.items)
            .map_err(|e| ChunkError::malformed(&path, e.to_string()))?;
        let Some(expected) = parse_checksum(&envelope.checksum) else {
            return Err(ChunkError::malformed(
                &path,
                format!("unparseable checksum {}", envelope.checksum),
            ));
        };
        if !verify_checksum(&canonical, expected) {
            return Err(ChunkError::Corruption {
                path,
                expected: envelope.checksum,
                computed: format_checksum(compute_checksum(&canonical)),
            });
        }

        let items: Vec<Record> = serde_json::from_value(envelope.items)
            .map_err(|e| ChunkError::malformed(&path, e.to_string()))?;
        Ok(Chunk {
            chunk_id,
            items,
            dirty: false,
        })
    }

    fn write_chunk_file_at(dir: &Path, chunk: &Chunk) -> ChunkResult<()> {
        let path = Self::chunk_path(dir, chunk.chunk_id);
        let items = serde_json::to_value(&chunk.items)
            .map_err(|e| ChunkError::malformed(&path, e.to_string()))?;
        let canonical =
            serde_json::to_vec(&items).map_err(|e| ChunkError::malformed(&path, e.to_string()))?;
        let envelope = ChunkEnvelope {
            chunk_id: chunk.chunk_id,
            checksum: format_checksum(compute_checksum(&canonical)),
            items,
        };
        let bytes = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| ChunkError::malformed(&path, e.to_string()))?;
        fsx::atomic_write(&path, &bytes).map_err(|e| ChunkError::io(&path, e))
    }

    fn rebuild_locations(&mut self) -> ChunkResult<()> {
        self.locations.clear();
        let ids: Vec<u64> = self.manifest.chunks.iter().map(|e| e.chunk_id).collect();
        for chunk_id in ids {
            // Transient read: build the id map without keeping every chunk
            // resident for the life of the store.
            let chunk = self.read_chunk_file(chunk_id)?;
            for record in &chunk.items {
                self.locations.insert(record.id.clone(), chunk_id);
            }
        }
        Ok(())
    }

    fn remove_orphan_chunk_files(&self) -> ChunkResult<()> {
        let chunks_dir = self.dir.join("chunks");
        let entries = fs::read_dir(&chunks_dir).map_err(|e| ChunkError::io(&chunks_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ChunkError::io(&chunks_dir, e))?;
            let name = entry.file_name();
            let Some(id) = parse_chunk_file_name(&name.to_string_lossy()) else {
                continue;
            };
            if !self.manifest.contains(id) {
                let path = entry.path();
                fs::remove_file(&path).map_err(|e| ChunkError::io(&path, e))?;
            }
        }
        Ok(())
    }
}

fn parse_chunk_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("chunk_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Entity;
    use tempfile::TempDir;

    fn task(id: &str, column: &str) -> Record {
        Record::new(
            id,
            Entity::Task {
                title: format!("task {}", id),
                column: column.to_string(),
                status: "open".to_string(),
                description: String::new(),
                priority: None,
                due_date: None,
                tags: Vec::new(),
            },
        )
    }

    #[test]
    fn inserts_fill_the_tail_then_spill_into_a_new_chunk() {
        let dir = TempDir::new().unwrap();
        let mut store = ChunkStore::open(dir.path(), 4, 1024 * 1024).unwrap();
        let records: Vec<Record> = (0..10).map(|i| task(&format!("t-{}", i), "todo")).collect();
        store.upsert(records).unwrap();
        let sizes: Vec<usize> = store.manifest().chunks.iter().map(|e| e.items).collect();
        assert_eq!(sizes, vec![4, 4, 2], "every chunk full except the last");
        assert_eq!(store.manifest().total_items(), 10);
    }

    #[test]
    fn cursor_walks_chunks_in_manifest_order() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = ChunkStore::open(dir.path(), 3, 1024 * 1024).unwrap();
            let records: Vec<Record> = (0..7).map(|i| task(&format!("t-{}", i), "todo")).collect();
            store.upsert(records).unwrap();
        }
        let mut store = ChunkStore::open(dir.path(), 3, 1024 * 1024).unwrap();
        let expected: Vec<u64> = store.manifest().chunks.iter().map(|e| e.chunk_id).collect();

        let mut seen = Vec::new();
        let mut total = 0;
        let mut cursor = store.iterate_chunks();
        while let Some(chunk) = cursor.next_chunk().unwrap() {
            seen.push(chunk.chunk_id);
            total += chunk.len();
        }
        assert_eq!(seen, expected);
        assert_eq!(total, 7);
    }

    #[test]
    fn stale_generation_plan_is_refused() {
        let dir = TempDir::new().unwrap();
        let mut store = ChunkStore::open(dir.path(), 4, 1024 * 1024).unwrap();
        let records: Vec<Record> = (0..6).map(|i| task(&format!("t-{}", i), "todo")).collect();
        store.upsert(records).unwrap();
        store
            .soft_delete(&["t-0".to_string(), "t-1".to_string()])
            .unwrap();

        let live = store.live_records().unwrap();
        let prepared = ChunkStore::prepare_generation(
            dir.path(),
            4,
            store.manifest().next_chunk_id,
            store.manifest().updated_at,
            live,
        )
        .unwrap();

        // A write lands between planning and the commit attempt.
        store.upsert(vec![task("t-new", "todo")]).unwrap();

        assert!(store.commit_generation(prepared).unwrap().is_none());
        assert!(store.contains_record("t-new"));
        assert_eq!(store.manifest().generation, 0, "no swap happened");
        for entry in &store.manifest().chunks {
            let path = dir
                .path()
                .join("chunks")
                .join(format!("chunk_{}.json", entry.chunk_id));
            assert!(path.is_file(), "live chunk file {} must survive", entry.chunk_id);
        }
    }

    #[test]
    fn reopen_recovers_locations_and_records() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = ChunkStore::open(dir.path(), 10, 1024 * 1024).unwrap();
            store.upsert(vec![task("t-1", "todo"), task("t-2", "doing")]).unwrap();
        }
        let mut store = ChunkStore::open(dir.path(), 10, 1024 * 1024).unwrap();
        assert!(store.contains_record("t-1"));
        let record = store.get_record("t-2").unwrap().unwrap();
        assert_eq!(record.id, "t-2");
    }

    #[test]
    fn corrupted_chunk_is_reported_not_ignored() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = ChunkStore::open(dir.path(), 10, 1024 * 1024).unwrap();
            store.upsert(vec![task("t-1", "todo")]).unwrap();
        }
        // Flip the stored title inside the chunk file.
        let path = dir.path().join("chunks/chunk_1.json");
        let contents = fs::read_to_string(&path).unwrap();
        fs::write(&path, contents.replace("task t-1", "task t-X")).unwrap();

        let result = ChunkStore::open(dir.path(), 10, 1024 * 1024);
        match result {
            Err(e) => assert!(e.is_corruption(), "expected corruption, got {}", e),
            Ok(_) => panic!("corrupted chunk must not load"),
        }
    }

    #[test]
    fn oversized_record_is_rejected_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let mut store = ChunkStore::open(dir.path(), 10, 256).unwrap();
        let mut big = task("t-big", "todo");
        if let Entity::Task { description, .. } = &mut big.entity {
            *description = "x".repeat(1024);
        }
        let result = store.upsert(vec![task("t-ok", "todo"), big]);
        assert!(matches!(result, Err(ChunkError::Capacity { .. })));
        assert!(
            !store.contains_record("t-ok"),
            "a rejected batch must leave no records behind"
        );
    }

    #[test]
    fn soft_delete_keeps_the_record_in_place() {
        let dir = TempDir::new().unwrap();
        let mut store = ChunkStore::open(dir.path(), 10, 1024 * 1024).unwrap();
        store.upsert(vec![task("t-1", "todo")]).unwrap();
        assert_eq!(store.soft_delete(&["t-1".to_string()]).unwrap(), 1);
        let record = store.get_record("t-1").unwrap().unwrap();
        assert!(record.deleted);
        assert_eq!(store.manifest().live_items(), 0);
        assert_eq!(store.manifest().total_items(), 1);
    }

    #[test]
    fn replace_generation_swaps_manifest_and_retires_files() {
        let dir = TempDir::new().unwrap();
        let mut store = ChunkStore::open(dir.path(), 3, 1024 * 1024).unwrap();
        let records: Vec<Record> = (0..7).map(|i| task(&format!("t-{}", i), "todo")).collect();
        store.upsert(records).unwrap();
        store
            .soft_delete(&["t-0".to_string(), "t-1".to_string()])
            .unwrap();

        let live = store.live_records().unwrap();
        let swap = store.replace_generation(live).unwrap();
        assert_eq!(swap.generation, 1);
        assert_eq!(store.manifest().live_items(), 5);
        assert_eq!(store.manifest().deleted_items(), 0);

        // Old-generation files are gone from disk.
        let remaining: Vec<String> = fs::read_dir(dir.path().join("chunks"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        for name in &remaining {
            let id = parse_chunk_file_name(name).unwrap();
            assert!(store.manifest().contains(id), "orphan file {} survived", name);
        }
    }
}
