//! Backup, restore, location migration and integrity checking.
//!
//! Backups are plain directory snapshots under `backups/<timestamp>/`: a
//! copy of every collection (chunks, indexes, manifest, stats) plus a
//! `backup.json` manifest carrying an aggregate checksum. A backup is marked
//! verified only after a successful read-back check. Restore and migration
//! never discard data silently: restore takes a safety backup first, and
//! migration flips the active-location pointer only after a byte-for-byte
//! verification of the copy.

mod coordinator;
mod errors;
mod integrity;
mod location;

pub use coordinator::BackupCoordinator;
pub use errors::{BackupError, BackupResult};
pub use integrity::check_collection;
pub use location::{change_data_location, DataLocation, LocationRegistry, MigrationPhase};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a backup exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Manual,
    Auto,
}

/// The `backup.json` manifest stored inside every backup directory.
/// Immutable once `verified` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub kind: BackupKind,
    /// Aggregate CRC32 over every snapshot file, in sorted path order.
    pub checksum: String,
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Outcome of a restore.
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub success: bool,
    pub migrated_items: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Outcome of a data-location migration.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub success: bool,
    pub migrated_items: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub phase: MigrationPhase,
}

/// Result of an integrity walk. Expected inconsistencies become issues, not
/// errors; only unreadable storage raises an error.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub healthy: bool,
    pub issues: Vec<String>,
}
