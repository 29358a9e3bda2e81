//! The engine service object.
//!
//! Constructed once at process startup with `Engine::initialize`, passed by
//! reference to every consumer, and shut down explicitly — there is no
//! ambient global. The engine owns one chunk store, index manager and stats
//! file per collection, a change detector gating the save path, and the
//! maintenance scheduler for debounced autosave and background compaction.
//!
//! Save control flow: the caller hands over the collection's current
//! in-memory state; the change detector classifies the delta against its
//! snapshot; when nothing changed, no write work happens at all. Otherwise
//! only the changed records are written through the chunk store, indexes
//! update incrementally, and compaction is scheduled opportunistically in
//! the background.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use crate::backup::{
    self, BackupCoordinator, BackupInfo, BackupKind, IntegrityReport, LocationRegistry,
    MigrationOutcome, RestoreOutcome,
};
use crate::change::{ChangeDetector, ChangeKind, ChangeSummary, DetectionReport};
use crate::chunk::ChunkStore;
use crate::compact::CompactionManager;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::index::IndexManager;
use crate::observability::Logger;
use crate::query::{QueryEngine, QueryOptions, QueryPerformance};
use crate::record::Record;
use crate::scheduler::MaintenanceScheduler;
use crate::stats::{CollectionStats, EngineStats};

/// Result of one save call.
#[derive(Debug)]
pub struct SaveOutcome {
    /// True when change detection found nothing to do and no write happened.
    pub skipped: bool,
    pub records_written: usize,
    pub records_deleted: usize,
    pub detection: DetectionReport,
    pub warnings: Vec<String>,
}

/// Result of one load call.
#[derive(Debug)]
pub struct LoadOutcome {
    pub items: Vec<Record>,
    pub performance: QueryPerformance,
    pub warnings: Vec<String>,
}

struct Collection {
    store: ChunkStore,
    indexes: IndexManager,
    stats: CollectionStats,
}

impl Collection {
    fn stats_path(&self) -> PathBuf {
        self.store.dir().join("stats.json")
    }

    fn flush(&mut self) -> EngineResult<()> {
        self.store.flush()?;
        self.indexes.persist()?;
        self.stats.refresh_from(self.store.manifest());
        self.stats.store(&self.stats_path())?;
        Ok(())
    }
}

struct EngineState {
    root: PathBuf,
    collections: HashMap<String, Collection>,
    detector: ChangeDetector,
    registry: LocationRegistry,
}

struct EngineInner {
    config: EngineConfig,
    compactor: CompactionManager,
    compacting: AtomicBool,
    scheduler: Mutex<Option<MaintenanceScheduler>>,
    state: Mutex<EngineState>,
}

/// The embedded persistence engine. Cheap to share: callers hold it by
/// reference for the life of the process.
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Opens (or creates) the data root and brings up the maintenance
    /// scheduler. If a location registry exists and points elsewhere, the
    /// registered active location wins over `config.root`.
    pub fn initialize(config: EngineConfig) -> EngineResult<Self> {
        std::fs::create_dir_all(&config.root)?;
        let registry = LocationRegistry::open(&config.root)?;
        let root = registry.active().to_path_buf();
        if root != config.root {
            std::fs::create_dir_all(&root)?;
            Logger::info(
                "active_location_redirect",
                &[
                    ("configured", &config.root.display().to_string()),
                    ("active", &root.display().to_string()),
                ],
            );
        }
        registry.persist(&root)?;

        let compactor = CompactionManager::new(config.compaction.clone());
        let scheduler = MaintenanceScheduler::new()?;
        let inner = Arc::new(EngineInner {
            config,
            compactor,
            compacting: AtomicBool::new(false),
            scheduler: Mutex::new(Some(scheduler)),
            state: Mutex::new(EngineState {
                root,
                collections: HashMap::new(),
                detector: ChangeDetector::new(),
                registry,
            }),
        });
        Ok(Self { inner })
    }

    /// Persists the collection's current state. Gated by change detection:
    /// when the state is identical to the committed snapshot this is a
    /// no-op.
    pub fn save(&self, collection: &str, records: &[Record]) -> EngineResult<SaveOutcome> {
        EngineInner::save(&self.inner, collection, records)
    }

    /// Debounced save: schedules a save after the configured delay,
    /// cancelling any earlier pending autosave. The latest scheduled call
    /// wins.
    pub fn schedule_autosave(&self, collection: &str, records: Vec<Record>) {
        let inner = Arc::clone(&self.inner);
        let name = collection.to_string();
        let delay = self.inner.config.autosave_debounce;
        let guard = lock_recovering(&self.inner.scheduler);
        if let Some(scheduler) = guard.as_ref() {
            scheduler.schedule_debounced(delay, move || {
                match EngineInner::save(&inner, &name, &records) {
                    Ok(outcome) if outcome.skipped => {}
                    Ok(outcome) => Logger::info(
                        "autosave_committed",
                        &[
                            ("collection", &name),
                            ("written", &outcome.records_written.to_string()),
                            ("deleted", &outcome.records_deleted.to_string()),
                        ],
                    ),
                    Err(e) => Logger::error(
                        "autosave_failed",
                        &[("collection", &name), ("error", &e.to_string())],
                    ),
                }
            });
        }
    }

    /// Runs a query against one collection.
    pub fn load(&self, collection: &str, options: &QueryOptions) -> EngineResult<LoadOutcome> {
        self.inner.load(collection, options)
    }

    /// Diffs the given state against the committed snapshot without writing
    /// anything.
    pub fn detect_changes(&self, collection: &str, records: &[Record]) -> EngineResult<DetectionReport> {
        let mut state = self.inner.lock_state();
        let state = &mut *state;
        EngineInner::open_collection(state, &self.inner.config, collection)?;
        Ok(state.detector.detect_changes(collection, records))
    }

    pub fn get_change_summary(&self, collection: &str) -> Option<ChangeSummary> {
        self.inner.lock_state().detector.get_change_summary(collection)
    }

    pub fn create_backup(
        &self,
        kind: BackupKind,
        description: Option<String>,
    ) -> EngineResult<BackupInfo> {
        self.inner.create_backup(kind, description)
    }

    pub fn list_backups(&self) -> EngineResult<Vec<BackupInfo>> {
        let state = self.inner.lock_state();
        let coordinator = BackupCoordinator::new(&state.root, self.inner.config.max_backups);
        Ok(coordinator.list_backups()?)
    }

    /// Restores a backup over live data. Destructive: requires `confirmed`
    /// and unconditionally takes a safety backup first.
    pub fn restore_from_backup(&self, id: &str, confirmed: bool) -> EngineResult<RestoreOutcome> {
        self.inner.restore_from_backup(id, confirmed)
    }

    /// Migrates the whole data root to a new location. The active pointer
    /// flips only after the copy verifies; on failure the original location
    /// stays fully active.
    pub fn change_data_location(
        &self,
        new_path: &Path,
        confirmed: bool,
    ) -> EngineResult<MigrationOutcome> {
        self.inner.change_data_location(new_path, confirmed)
    }

    pub fn perform_integrity_check(&self) -> EngineResult<IntegrityReport> {
        self.inner.perform_integrity_check()
    }

    pub fn get_stats(&self) -> EngineResult<EngineStats> {
        self.inner.get_stats()
    }

    /// Flushes pending writes, waits for background maintenance and stops
    /// the scheduler.
    pub fn shutdown(self) -> EngineResult<()> {
        {
            let mut state = self.inner.lock_state();
            EngineInner::flush_all(&mut state)?;
        }
        let scheduler = lock_recovering(&self.inner.scheduler).take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown();
        }
        // Background work may have written between the flush and the stop.
        let mut state = self.inner.lock_state();
        EngineInner::flush_all(&mut state)?;
        Ok(())
    }
}

impl EngineInner {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(inner: &Arc<Self>, collection: &str, records: &[Record]) -> EngineResult<SaveOutcome> {
        let (outcome, needs_compaction) = inner.save_locked(collection, records)?;
        if needs_compaction {
            Self::schedule_compaction(inner, collection);
        }
        Ok(outcome)
    }

    fn save_locked(
        &self,
        collection: &str,
        records: &[Record],
    ) -> EngineResult<(SaveOutcome, bool)> {
        // Validation happens before any lock or write; a failed batch has no
        // side effects.
        let mut ids = HashSet::new();
        for record in records {
            record.validate().map_err(EngineError::Validation)?;
            if !ids.insert(record.id.as_str()) {
                return Err(EngineError::Validation(format!(
                    "duplicate record id {} in save batch",
                    record.id
                )));
            }
        }

        let mut state = self.lock_state();
        let state = &mut *state;
        let warnings = Self::open_collection(state, &self.config, collection)?;

        let detection = state.detector.detect_changes(collection, records);
        if !detection.has_uncommitted_changes {
            return Ok((
                SaveOutcome {
                    skipped: true,
                    records_written: 0,
                    records_deleted: 0,
                    detection,
                    warnings,
                },
                false,
            ));
        }

        let col = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| internal("collection vanished while locked"))?;

        let by_id: HashMap<&str, &Record> =
            records.iter().map(|r| (r.id.as_str(), r)).collect();

        let mut upserts: Vec<Record> = Vec::new();
        let mut previous: HashMap<String, Record> = HashMap::new();
        let mut deletes: Vec<String> = Vec::new();
        let now = Utc::now();

        for change in &detection.changes {
            match change.kind {
                ChangeKind::Delete => deletes.push(change.record_id.clone()),
                _ => {
                    let Some(record) = by_id.get(change.record_id.as_str()) else {
                        continue;
                    };
                    if let Some(prev) = col.store.get_record(&change.record_id)? {
                        previous.insert(change.record_id.clone(), prev);
                    }
                    let mut record = (*record).clone();
                    record.updated_at = now;
                    upserts.push(record);
                }
            }
        }

        let written = upserts.len();
        col.store.upsert(upserts.clone())?;
        for record in &upserts {
            col.indexes.apply_upsert(record, previous.get(&record.id));
        }

        let deleted = col.store.soft_delete(&deletes)?;
        for id in &deletes {
            col.indexes.apply_delete(id);
        }

        col.indexes.persist()?;
        col.stats.refresh_from(col.store.manifest());
        col.stats.writes += 1;
        col.stats.store(&col.stats_path())?;

        state.detector.mark_changes_committed(collection);

        let needs_compaction = self.compactor.should_compact(
            state
                .collections
                .get(collection)
                .ok_or_else(|| internal("collection vanished while locked"))?
                .store
                .manifest(),
        );

        Ok((
            SaveOutcome {
                skipped: false,
                records_written: written,
                records_deleted: deleted,
                detection,
                warnings,
            },
            needs_compaction,
        ))
    }

    fn schedule_compaction(inner: &Arc<Self>, collection: &str) {
        if inner.compacting.swap(true, Ordering::SeqCst) {
            return; // one background pass at a time
        }
        let guard = lock_recovering(&inner.scheduler);
        let Some(scheduler) = guard.as_ref() else {
            inner.compacting.store(false, Ordering::SeqCst);
            return;
        };
        let worker = Arc::clone(inner);
        let name = collection.to_string();
        scheduler.spawn_background(move || {
            if let Err(e) = worker.compact_collection(&name) {
                Logger::error(
                    "compaction_failed",
                    &[("collection", &name), ("error", &e.to_string())],
                );
            }
            worker.compacting.store(false, Ordering::SeqCst);
        });
    }

    /// Background compaction in three phases, so foreground loads and saves
    /// are never blocked for the duration of the pass. The state lock is held
    /// only to capture the live set and, later, to commit the manifest swap;
    /// the chunk-file writes in between happen unlocked against a generation
    /// no manifest references yet.
    fn compact_collection(&self, collection: &str) -> EngineResult<()> {
        let (dir, capacity, next_chunk_id, based_on, live) = {
            let mut state = self.lock_state();
            let Some(col) = state.collections.get_mut(collection) else {
                return Ok(());
            };
            // Re-check under the lock; a restore or migration may have landed
            // in the meantime.
            if !self.compactor.should_compact(col.store.manifest()) {
                return Ok(());
            }
            (
                col.store.dir().to_path_buf(),
                col.store.capacity(),
                col.store.manifest().next_chunk_id,
                col.store.manifest().updated_at,
                col.store.live_records()?,
            )
        };

        let prepared =
            ChunkStore::prepare_generation(&dir, capacity, next_chunk_id, based_on, live)?;

        let mut state = self.lock_state();
        let Some(col) = state.collections.get_mut(collection) else {
            return Ok(());
        };
        let Some(report) = self
            .compactor
            .commit(&mut col.store, &mut col.indexes, prepared)?
        else {
            // A write landed while the generation was being staged; the next
            // save re-evaluates the trigger.
            return Ok(());
        };
        col.stats.last_compaction = Some(report.finished_at);
        col.stats.refresh_from(col.store.manifest());
        col.stats.store(&col.stats_path())?;
        Ok(())
    }

    fn load(&self, collection: &str, options: &QueryOptions) -> EngineResult<LoadOutcome> {
        let mut state = self.lock_state();
        let state = &mut *state;
        let warnings = Self::open_collection(state, &self.config, collection)?;
        let col = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| internal("collection vanished while locked"))?;
        let output = QueryEngine::execute(&mut col.store, &col.indexes, options)?;
        Ok(LoadOutcome {
            items: output.items,
            performance: output.performance,
            warnings,
        })
    }

    fn create_backup(
        &self,
        kind: BackupKind,
        description: Option<String>,
    ) -> EngineResult<BackupInfo> {
        let mut state = self.lock_state();
        Self::flush_all(&mut state)?;
        let coordinator = BackupCoordinator::new(&state.root, self.config.max_backups);
        Ok(coordinator.create_backup(kind, description)?)
    }

    fn restore_from_backup(&self, id: &str, confirmed: bool) -> EngineResult<RestoreOutcome> {
        let mut state = self.lock_state();
        Self::flush_all(&mut state)?;
        let coordinator = BackupCoordinator::new(&state.root, self.config.max_backups);
        let outcome = coordinator.restore_from_backup(id, confirmed)?;
        // In-memory state is stale either way; reopen lazily from disk and
        // re-baseline change tracking on the restored state.
        state.collections.clear();
        state.detector = ChangeDetector::new();
        Ok(outcome)
    }

    fn change_data_location(
        &self,
        new_path: &Path,
        confirmed: bool,
    ) -> EngineResult<MigrationOutcome> {
        let mut state = self.lock_state();
        Self::flush_all(&mut state)?;
        let old_root = state.root.clone();
        let mut outcome = backup::change_data_location(
            &mut state.registry,
            &old_root,
            new_path,
            confirmed,
        )?;
        if outcome.success {
            // Leave a forwarding pointer behind so an engine opened against
            // the old root lands on the new location.
            if let Err(e) = state.registry.persist(&old_root) {
                outcome
                    .warnings
                    .push(format!("could not update the old location registry: {}", e));
            }
            state.root = new_path.to_path_buf();
            state.collections.clear();
            state.detector = ChangeDetector::new();
        }
        Ok(outcome)
    }

    fn perform_integrity_check(&self) -> EngineResult<IntegrityReport> {
        let mut state = self.lock_state();
        let state = &mut *state;

        let mut report = IntegrityReport {
            healthy: true,
            issues: Vec::new(),
        };
        for name in collection_names_on_disk(&state.root)? {
            Self::open_collection(state, &self.config, &name)?;
            let col = state
                .collections
                .get_mut(&name)
                .ok_or_else(|| internal("collection vanished while locked"))?;
            let partial = backup::check_collection(&mut col.store, &col.indexes)?;
            if !partial.healthy {
                report.healthy = false;
            }
            report
                .issues
                .extend(partial.issues.into_iter().map(|i| format!("{}: {}", name, i)));
        }
        Ok(report)
    }

    fn get_stats(&self) -> EngineResult<EngineStats> {
        let mut state = self.lock_state();
        let state = &mut *state;
        let mut collections = Vec::new();
        for name in collection_names_on_disk(&state.root)? {
            Self::open_collection(state, &self.config, &name)?;
            if let Some(col) = state.collections.get_mut(&name) {
                col.stats.refresh_from(col.store.manifest());
                collections.push(col.stats.clone());
            }
        }
        let coordinator = BackupCoordinator::new(&state.root, self.config.max_backups);
        let backups = coordinator.list_backups()?.len();
        Ok(EngineStats {
            active_location: state.root.clone(),
            collections,
            backups,
        })
    }

    /// Ensures a collection is open, falling back to the most recent
    /// verified backup when its chunks fail their checksums. The warning
    /// surfaces to the caller instead of failing silently.
    fn open_collection(
        state: &mut EngineState,
        config: &EngineConfig,
        collection: &str,
    ) -> EngineResult<Vec<String>> {
        if state.collections.contains_key(collection) {
            return Ok(Vec::new());
        }

        let mut warnings = Vec::new();
        let dir = state.root.join(collection);
        let store = match ChunkStore::open(&dir, config.chunk_capacity, config.max_record_bytes) {
            Ok(store) => store,
            Err(e) if e.is_corruption() => {
                let coordinator = BackupCoordinator::new(&state.root, config.max_backups);
                let Some(backup) = coordinator.latest_verified()? else {
                    return Err(e.into());
                };
                Logger::warn(
                    "corruption_fallback",
                    &[("collection", collection), ("backup", &backup.id)],
                );
                let restore = coordinator.restore_from_backup(&backup.id, true)?;
                if !restore.success {
                    return Err(e.into());
                }
                // The restore replaced every collection on disk.
                state.collections.clear();
                state.detector = ChangeDetector::new();
                warnings.push(format!(
                    "collection {} failed its checksum; restored from verified backup {}",
                    collection, backup.id
                ));
                warnings.extend(restore.warnings);
                ChunkStore::open(&dir, config.chunk_capacity, config.max_record_bytes)?
            }
            Err(e) => return Err(e.into()),
        };

        let indexes = IndexManager::open(dir.join("indexes"), &config.index_specs)?;
        let stats = CollectionStats::load(&dir.join("stats.json"))
            .unwrap_or_else(|| CollectionStats::new(collection));

        let mut col = Collection {
            store,
            indexes,
            stats,
        };
        if !state.detector.is_tracking(collection) {
            let live = col.store.live_records()?;
            state.detector.start_tracking(collection, &live);
        }
        state.collections.insert(collection.to_string(), col);
        Ok(warnings)
    }

    fn flush_all(state: &mut EngineState) -> EngineResult<()> {
        for col in state.collections.values_mut() {
            col.flush()?;
        }
        Ok(())
    }
}

fn collection_names_on_disk(root: &Path) -> EngineResult<Vec<String>> {
    let mut names = Vec::new();
    if !root.exists() {
        return Ok(names);
    }
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        // `<collection>.old` is the escape hatch of an interrupted restore
        // swap, not a collection.
        if name.ends_with(".old") {
            continue;
        }
        if path.is_dir() && path.join("manifest.json").is_file() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn internal(msg: &str) -> EngineError {
    EngineError::Io(io::Error::new(io::ErrorKind::Other, msg.to_string()))
}

fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
