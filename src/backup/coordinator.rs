//! The backup coordinator.
//!
//! Create sequence: copy every collection into a temporary directory under
//! `backups/`, compute the aggregate checksum, write `backup.json`, then
//! rename the temp directory to its final timestamped name. The rename is
//! the commit point; a crash mid-backup leaves only a `.tmp` directory that
//! the next run sweeps. Verification re-reads the finished snapshot and
//! flips `verified` only when the checksum matches.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use crc32fast::Hasher;

use super::errors::{BackupError, BackupResult};
use super::{BackupInfo, BackupKind, RestoreOutcome};
use crate::checksum::{compute_file_checksum, format_checksum, parse_checksum, verify_checksum};
use crate::chunk::Manifest;
use crate::fsx;
use crate::observability::Logger;
use crate::record::Record;

/// Snapshot/restore over the data root. The root holds one directory per
/// collection plus `backups/`.
pub struct BackupCoordinator {
    root: PathBuf,
    max_backups: usize,
}

impl BackupCoordinator {
    pub fn new(root: impl Into<PathBuf>, max_backups: usize) -> Self {
        Self {
            root: root.into(),
            max_backups: max_backups.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Creates a backup of the current on-disk state.
    pub fn create_backup(
        &self,
        kind: BackupKind,
        description: Option<String>,
    ) -> BackupResult<BackupInfo> {
        self.create_backup_protecting(kind, description, None)
    }

    /// As `create_backup`, but rotation will never prune `protected` — used
    /// when taking the safety backup right before restoring that id.
    fn create_backup_protecting(
        &self,
        kind: BackupKind,
        description: Option<String>,
        protected: Option<&str>,
    ) -> BackupResult<BackupInfo> {
        let backups_dir = self.backups_dir();
        fs::create_dir_all(&backups_dir).map_err(|e| BackupError::io(&backups_dir, e))?;
        self.sweep_stale_temp_dirs(&backups_dir)?;

        let id = Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string();
        let temp_dir = backups_dir.join(format!(".{}.tmp", id));
        let final_dir = backups_dir.join(&id);

        let result = (|| -> BackupResult<BackupInfo> {
            let snapshot_dir = temp_dir.join("collections");
            fs::create_dir_all(&snapshot_dir).map_err(|e| BackupError::io(&snapshot_dir, e))?;
            for name in self.collection_names()? {
                let src = self.root.join(&name);
                let dst = snapshot_dir.join(&name);
                fsx::copy_dir_durable(&src, &dst).map_err(|e| BackupError::io(&dst, e))?;
            }

            let checksum = snapshot_checksum(&snapshot_dir)?;
            let size_bytes =
                fsx::dir_size(&snapshot_dir).map_err(|e| BackupError::io(&snapshot_dir, e))?;

            let mut info = BackupInfo {
                id: id.clone(),
                created_at: Utc::now(),
                size_bytes,
                kind,
                checksum,
                verified: false,
                description,
            };
            let manifest_path = temp_dir.join("backup.json");
            fsx::atomic_write_json(&manifest_path, &info)
                .map_err(|e| BackupError::io(&manifest_path, e))?;

            // Commit point.
            fs::rename(&temp_dir, &final_dir).map_err(|e| BackupError::io(&final_dir, e))?;
            fsx::fsync_dir(&backups_dir).map_err(|e| BackupError::io(&backups_dir, e))?;

            // Read-back verification against the committed copy: the
            // aggregate checksum proves the copy matches what was written,
            // and each chunk file's embedded checksum proves the source was
            // internally consistent. A snapshot of already-corrupt chunks
            // must never be marked verified, or a later corruption fallback
            // would restore it.
            let committed = final_dir.join("collections");
            let reread = snapshot_checksum(&committed)?;
            let violations = chunk_checksum_violations(&committed)?;
            if reread == info.checksum && violations.is_empty() {
                info.verified = true;
                let committed_manifest = final_dir.join("backup.json");
                fsx::atomic_write_json(&committed_manifest, &info)
                    .map_err(|e| BackupError::io(&committed_manifest, e))?;
            } else {
                Logger::warn(
                    "backup_verification_failed",
                    &[
                        ("backup", &id),
                        ("computed", &reread),
                        ("chunk_violations", &violations.len().to_string()),
                    ],
                );
            }
            Ok(info)
        })();

        if result.is_err() && temp_dir.exists() {
            let _ = fs::remove_dir_all(&temp_dir);
        }
        if result.is_ok() {
            self.rotate(protected)?;
        }
        result
    }

    /// Known backups, newest first. Directories without a readable manifest
    /// are skipped.
    pub fn list_backups(&self) -> BackupResult<Vec<BackupInfo>> {
        let backups_dir = self.backups_dir();
        if !backups_dir.exists() {
            return Ok(Vec::new());
        }
        let mut backups = Vec::new();
        let entries = fs::read_dir(&backups_dir).map_err(|e| BackupError::io(&backups_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| BackupError::io(&backups_dir, e))?;
            let path = entry.path();
            if !path.is_dir() || entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let manifest_path = path.join("backup.json");
            let Ok(bytes) = fs::read(&manifest_path) else {
                continue;
            };
            match serde_json::from_slice::<BackupInfo>(&bytes) {
                Ok(info) => backups.push(info),
                Err(e) => Logger::warn(
                    "backup_manifest_unreadable",
                    &[
                        ("path", &manifest_path.display().to_string()),
                        ("error", &e.to_string()),
                    ],
                ),
            }
        }
        backups.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(backups)
    }

    /// The newest backup that passed read-back verification, if any.
    pub fn latest_verified(&self) -> BackupResult<Option<BackupInfo>> {
        Ok(self.list_backups()?.into_iter().find(|b| b.verified))
    }

    /// Restores a backup over the live data root.
    ///
    /// Order matters: validate the target first (checksum, then schema of
    /// every chunk file), take a safety backup of the current state, and
    /// only then swap collection directories. Any failure before the swap
    /// leaves live data untouched; a failure during the swap rolls the
    /// affected collection back from its `.old` copy.
    pub fn restore_from_backup(&self, id: &str, confirmed: bool) -> BackupResult<RestoreOutcome> {
        if !confirmed {
            return Err(BackupError::ConfirmationRequired);
        }
        let backup_dir = self.backups_dir().join(id);
        if !backup_dir.is_dir() {
            return Err(BackupError::NotFound(id.to_string()));
        }
        let info = self.read_backup_manifest(&backup_dir)?;

        let snapshot_dir = backup_dir.join("collections");
        let computed = snapshot_checksum(&snapshot_dir)?;
        if computed != info.checksum {
            return Err(BackupError::ChecksumMismatch {
                id: id.to_string(),
                expected: info.checksum,
                computed,
            });
        }
        validate_snapshot(id, &snapshot_dir)?;

        let mut warnings = Vec::new();
        if !info.verified {
            warnings.push(format!(
                "backup {} was never verified after creation; checksum validated now",
                id
            ));
        }

        // Never discard the current state silently.
        let safety = self.create_backup_protecting(
            BackupKind::Auto,
            Some(format!("safety backup before restoring {}", id)),
            Some(id),
        )?;
        warnings.push(format!("current state preserved as backup {}", safety.id));

        let mut errors = Vec::new();
        let mut migrated_items = 0;
        for name in collection_names_in(&snapshot_dir)? {
            let src = snapshot_dir.join(&name);
            let dst = self.root.join(&name);
            let old = self.root.join(format!("{}.old", name));

            if let Err(e) = swap_directory(&src, &dst, &old) {
                errors.push(format!("collection {}: {}", name, e));
                continue;
            }
            if let Ok(Some(manifest)) = Manifest::load(&dst.join("manifest.json")) {
                migrated_items += manifest.live_items();
            }
        }

        let success = errors.is_empty();
        Logger::info(
            "restore_finished",
            &[
                ("backup", id),
                ("success", if success { "true" } else { "false" }),
                ("migrated_items", &migrated_items.to_string()),
            ],
        );
        Ok(RestoreOutcome {
            success,
            migrated_items,
            errors,
            warnings,
        })
    }

    fn read_backup_manifest(&self, backup_dir: &Path) -> BackupResult<BackupInfo> {
        let path = backup_dir.join("backup.json");
        let bytes = fs::read(&path).map_err(|e| BackupError::io(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| BackupError::malformed(&path, e.to_string()))
    }

    /// Deletes the oldest backups beyond the rotation limit.
    fn rotate(&self, protected: Option<&str>) -> BackupResult<()> {
        let mut backups = self.list_backups()?;
        // list_backups is newest-first; prune from the tail.
        while backups.len() > self.max_backups {
            let Some(oldest) = backups.pop() else {
                break;
            };
            if Some(oldest.id.as_str()) == protected {
                continue;
            }
            let path = self.backups_dir().join(&oldest.id);
            fs::remove_dir_all(&path).map_err(|e| BackupError::io(&path, e))?;
            Logger::info("backup_rotated_out", &[("backup", &oldest.id)]);
        }
        Ok(())
    }

    fn sweep_stale_temp_dirs(&self, backups_dir: &Path) -> BackupResult<()> {
        let entries = fs::read_dir(backups_dir).map_err(|e| BackupError::io(backups_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| BackupError::io(backups_dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') && name.ends_with(".tmp") {
                let _ = fs::remove_dir_all(entry.path());
            }
        }
        Ok(())
    }

    /// Collection directories under the root: anything with a manifest.json.
    fn collection_names(&self) -> BackupResult<Vec<String>> {
        collection_names_in(&self.root)
    }
}

/// Directories containing a `manifest.json`, i.e. collections.
pub(super) fn collection_names_in(dir: &Path) -> BackupResult<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| BackupError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| BackupError::io(dir, e))?;
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

/// Aggregate CRC32 over every file in the snapshot, in sorted relative-path
/// order, mixing each path into the hash so renames are detected too.
pub(super) fn snapshot_checksum(snapshot_dir: &Path) -> BackupResult<String> {
    let files =
        fsx::walk_files(snapshot_dir).map_err(|e| BackupError::io(snapshot_dir, e))?;
    let mut hasher = Hasher::new();
    for rel in files {
        hasher.update(rel.to_string_lossy().as_bytes());
        let path = snapshot_dir.join(&rel);
        let crc = compute_file_checksum(&path).map_err(|e| BackupError::io(&path, e))?;
        hasher.update(&crc.to_le_bytes());
    }
    Ok(format_checksum(hasher.finalize()))
}

/// Verifies every chunk file in a snapshot against its embedded checksum,
/// recomputed over the canonical serialization of `items` exactly as the
/// chunk store does on read. Returns the violations so callers can refuse or
/// merely log.
pub(super) fn chunk_checksum_violations(snapshot_dir: &Path) -> BackupResult<Vec<String>> {
    let mut violations = Vec::new();
    for name in collection_names_in(snapshot_dir)? {
        let chunks_dir = snapshot_dir.join(&name).join("chunks");
        if !chunks_dir.exists() {
            continue;
        }
        let entries = fs::read_dir(&chunks_dir).map_err(|e| BackupError::io(&chunks_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| BackupError::io(&chunks_dir, e))?;
            let path = entry.path();
            let bytes = fs::read(&path).map_err(|e| BackupError::io(&path, e))?;
            let Ok(envelope) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
                violations.push(format!("{}: not valid JSON", path.display()));
                continue;
            };
            let Some(expected) = envelope
                .get("checksum")
                .and_then(|v| v.as_str())
                .and_then(parse_checksum)
            else {
                violations.push(format!("{}: missing or unparseable checksum", path.display()));
                continue;
            };
            let items = envelope.get("items").cloned().unwrap_or_default();
            let canonical = serde_json::to_vec(&items)
                .map_err(|e| BackupError::malformed(&path, e.to_string()))?;
            if !verify_checksum(&canonical, expected) {
                violations.push(format!(
                    "{}: contents do not match the embedded checksum",
                    path.display()
                ));
            }
        }
    }
    Ok(violations)
}

/// Schema validation of a snapshot: every chunk file must pass its embedded
/// checksum and parse into typed records, and every collection manifest must
/// parse. Nothing is written.
fn validate_snapshot(id: &str, snapshot_dir: &Path) -> BackupResult<()> {
    if let Some(violation) = chunk_checksum_violations(snapshot_dir)?.into_iter().next() {
        return Err(BackupError::InvalidSnapshot {
            id: id.to_string(),
            reason: violation,
        });
    }
    for name in collection_names_in(snapshot_dir)? {
        let collection_dir = snapshot_dir.join(&name);
        let manifest_path = collection_dir.join("manifest.json");
        Manifest::load(&manifest_path).map_err(|e| BackupError::InvalidSnapshot {
            id: id.to_string(),
            reason: e.to_string(),
        })?;

        let chunks_dir = collection_dir.join("chunks");
        if !chunks_dir.exists() {
            continue;
        }
        let entries = fs::read_dir(&chunks_dir).map_err(|e| BackupError::io(&chunks_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| BackupError::io(&chunks_dir, e))?;
            let path = entry.path();
            let bytes = fs::read(&path).map_err(|e| BackupError::io(&path, e))?;
            let envelope: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
                BackupError::InvalidSnapshot {
                    id: id.to_string(),
                    reason: format!("{}: {}", path.display(), e),
                }
            })?;
            let items = envelope.get("items").cloned().unwrap_or_default();
            serde_json::from_value::<Vec<Record>>(items).map_err(|e| {
                BackupError::InvalidSnapshot {
                    id: id.to_string(),
                    reason: format!("{}: {}", path.display(), e),
                }
            })?;
        }
    }
    Ok(())
}

/// Replaces `dst` with `src` keeping an `.old` escape hatch: move the live
/// directory aside, copy the replacement in, drop the old copy only on
/// success.
fn swap_directory(src: &Path, dst: &Path, old: &Path) -> std::io::Result<()> {
    if old.exists() {
        fs::remove_dir_all(old)?;
    }
    let had_previous = dst.exists();
    if had_previous {
        fs::rename(dst, old)?;
    }
    match fsx::copy_dir_durable(src, dst) {
        Ok(()) => {
            if had_previous {
                fs::remove_dir_all(old)?;
            }
            Ok(())
        }
        Err(e) => {
            // Roll back: restore the previous directory.
            let _ = fs::remove_dir_all(dst);
            if had_previous {
                let _ = fs::rename(old, dst);
            }
            Err(e)
        }
    }
}
