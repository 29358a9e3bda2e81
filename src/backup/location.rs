//! Data-location registry and migration.
//!
//! Exactly one location is active at a time. Migration is copy-then-switch:
//! `idle -> copying -> verifying -> {committed | rolled_back}`. The active
//! pointer flips only after every copied file verifies byte-for-byte; any
//! failure removes the partial copy and leaves the original location fully
//! active.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::coordinator::collection_names_in;
use super::errors::{BackupError, BackupResult};
use super::MigrationOutcome;
use crate::chunk::Manifest;
use crate::fsx;
use crate::observability::Logger;

/// One known data root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLocation {
    pub path: PathBuf,
    pub is_default: bool,
    pub last_used: DateTime<Utc>,
}

/// Migration state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Idle,
    Copying,
    Verifying,
    Committed,
    RolledBack,
}

/// Persisted form of `locations.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    active: PathBuf,
    locations: Vec<DataLocation>,
}

/// Registry of known data locations, stored as `locations.json` inside the
/// active root.
#[derive(Debug)]
pub struct LocationRegistry {
    active: PathBuf,
    locations: Vec<DataLocation>,
}

impl LocationRegistry {
    /// Loads the registry from `root`, seeding it with `root` as the default
    /// location on first use.
    pub fn open(root: &Path) -> BackupResult<Self> {
        let path = root.join("locations.json");
        match fs::read(&path) {
            Ok(bytes) => {
                let file: RegistryFile = serde_json::from_slice(&bytes)
                    .map_err(|e| BackupError::malformed(&path, e.to_string()))?;
                Ok(Self {
                    active: file.active,
                    locations: file.locations,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self {
                active: root.to_path_buf(),
                locations: vec![DataLocation {
                    path: root.to_path_buf(),
                    is_default: true,
                    last_used: Utc::now(),
                }],
            }),
            Err(e) => Err(BackupError::io(&path, e)),
        }
    }

    pub fn active(&self) -> &Path {
        &self.active
    }

    pub fn locations(&self) -> &[DataLocation] {
        &self.locations
    }

    /// Flips the active pointer to `new_root` and persists the registry into
    /// the new root. Call only after the copy has been verified.
    pub fn commit_switch(&mut self, new_root: &Path) -> BackupResult<()> {
        let now = Utc::now();
        if let Some(existing) = self.locations.iter_mut().find(|l| l.path == new_root) {
            existing.last_used = now;
        } else {
            self.locations.push(DataLocation {
                path: new_root.to_path_buf(),
                is_default: false,
                last_used: now,
            });
        }
        self.active = new_root.to_path_buf();
        self.persist(new_root)
    }

    pub fn persist(&self, root: &Path) -> BackupResult<()> {
        let path = root.join("locations.json");
        let file = RegistryFile {
            active: self.active.clone(),
            locations: self.locations.clone(),
        };
        fsx::atomic_write_json(&path, &file).map_err(|e| BackupError::io(&path, e))
    }
}

/// Copies the entire data root to `new_root`, verifies the copy
/// byte-for-byte, and flips the registry pointer.
///
/// On any failure the partial copy is removed, the outcome reports
/// `rolled_back`, and the original location remains fully active.
pub fn change_data_location(
    registry: &mut LocationRegistry,
    old_root: &Path,
    new_root: &Path,
    confirmed: bool,
) -> BackupResult<MigrationOutcome> {
    if !confirmed {
        return Err(BackupError::ConfirmationRequired);
    }

    let mut outcome = MigrationOutcome {
        success: false,
        migrated_items: 0,
        errors: Vec::new(),
        warnings: Vec::new(),
        phase: MigrationPhase::Idle,
    };

    if new_root == old_root {
        outcome.errors.push("new location equals the active location".to_string());
        return Ok(outcome);
    }
    if new_root.exists() {
        match fs::read_dir(new_root) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    outcome
                        .errors
                        .push(format!("target {} is not empty", new_root.display()));
                    return Ok(outcome);
                }
            }
            Err(e) => {
                outcome
                    .errors
                    .push(format!("target {} is unreadable: {}", new_root.display(), e));
                return Ok(outcome);
            }
        }
    }

    outcome.phase = MigrationPhase::Copying;
    if let Err(e) = fsx::copy_dir_durable(old_root, new_root) {
        outcome.errors.push(format!("copy failed: {}", e));
        roll_back(new_root, &mut outcome);
        return Ok(outcome);
    }

    outcome.phase = MigrationPhase::Verifying;
    if let Err(reason) = verify_copy(old_root, new_root) {
        outcome.errors.push(reason);
        roll_back(new_root, &mut outcome);
        return Ok(outcome);
    }

    // Commit: the pointer flip happens only after verification.
    if let Err(e) = registry.commit_switch(new_root) {
        outcome.errors.push(format!("pointer flip failed: {}", e));
        roll_back(new_root, &mut outcome);
        return Ok(outcome);
    }

    outcome.migrated_items = count_live_items(new_root)?;
    outcome.success = true;
    outcome.phase = MigrationPhase::Committed;
    Logger::info(
        "location_migrated",
        &[
            ("from", &old_root.display().to_string()),
            ("to", &new_root.display().to_string()),
            ("items", &outcome.migrated_items.to_string()),
        ],
    );
    Ok(outcome)
}

fn roll_back(new_root: &Path, outcome: &mut MigrationOutcome) {
    if new_root.exists() {
        if let Err(e) = fs::remove_dir_all(new_root) {
            outcome
                .warnings
                .push(format!("could not remove partial copy: {}", e));
        }
    }
    outcome.phase = MigrationPhase::RolledBack;
    Logger::warn(
        "location_migration_rolled_back",
        &[("target", &new_root.display().to_string())],
    );
}

/// Byte-for-byte comparison of the copied tree against the source.
fn verify_copy(src: &Path, dst: &Path) -> Result<(), String> {
    let src_files = fsx::walk_files(src).map_err(|e| format!("source walk failed: {}", e))?;
    let dst_files = fsx::walk_files(dst).map_err(|e| format!("copy walk failed: {}", e))?;
    if src_files != dst_files {
        return Err(format!(
            "file lists differ: {} source files, {} copied files",
            src_files.len(),
            dst_files.len()
        ));
    }
    for rel in &src_files {
        let a = fs::read(src.join(rel)).map_err(|e| format!("{}: {}", rel.display(), e))?;
        let b = fs::read(dst.join(rel)).map_err(|e| format!("{}: {}", rel.display(), e))?;
        if a != b {
            return Err(format!("{} differs after copy", rel.display()));
        }
    }
    Ok(())
}

fn count_live_items(root: &Path) -> BackupResult<usize> {
    let mut total = 0;
    for name in collection_names_in(root)? {
        if let Some(manifest) = Manifest::load(&root.join(&name).join("manifest.json"))
            .map_err(|e| BackupError::malformed(root.join(&name), e.to_string()))?
        {
            total += manifest.live_items();
        }
    }
    Ok(total)
}
