//! chunkdb - an embedded chunked record store for local-first apps
//!
//! Records live in bounded JSON chunks with CRC32 checksums; field indexes,
//! snapshot-diff change detection, background compaction and verified
//! backups sit on top. `Engine` is the single entry point.

pub mod backup;
pub mod change;
pub mod checksum;
pub mod chunk;
pub mod compact;
pub mod config;
pub mod engine;
pub mod error;
pub mod fsx;
pub mod index;
pub mod observability;
pub mod query;
pub mod record;
pub mod scheduler;
pub mod stats;

pub use backup::{
    BackupInfo, BackupKind, IntegrityReport, MigrationOutcome, MigrationPhase, RestoreOutcome,
};
pub use change::{ChangeKind, ChangeSummary, DetectionReport};
pub use config::{CompactionConfig, EngineConfig, IndexSpec};
pub use engine::{Engine, LoadOutcome, SaveOutcome};
pub use error::{EngineError, EngineResult};
pub use index::IndexKind;
pub use query::{Predicate, QueryOptions, SortOrder, SortSpec};
pub use record::{Entity, Record};
