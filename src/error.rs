//! Crate-level error type.
//!
//! Module errors keep their own enums; the engine surface folds them into
//! one type. The taxonomy callers branch on: validation and capacity errors
//! are rejected synchronously with no side effects, corruption triggers the
//! backup fallback, I/O during migration or restore triggers rollback.

use thiserror::Error;

use crate::backup::BackupError;
use crate::chunk::ChunkError;
use crate::compact::CompactError;
use crate::index::IndexError;
use crate::query::QueryError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A record failed schema validation on write. Nothing was persisted.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Compaction(#[from] CompactError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Checksum mismatch somewhere in the storage or backup path.
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Chunk(e) => e.is_corruption(),
            Self::Backup(BackupError::ChecksumMismatch { .. }) => true,
            _ => false,
        }
    }

    /// A single record too large to store.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Chunk(ChunkError::Capacity { .. }))
    }
}
