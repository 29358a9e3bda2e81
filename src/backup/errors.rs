//! Backup and migration error types.

use std::path::PathBuf;

use thiserror::Error;

pub type BackupResult<T> = Result<T, BackupError>;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup {0} not found")]
    NotFound(String),

    /// The backup archive no longer matches its recorded checksum. Restore
    /// aborts before touching live data.
    #[error("checksum mismatch for backup {id}: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        id: String,
        expected: String,
        computed: String,
    },

    #[error("malformed backup manifest {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// A backup whose chunk contents fail schema validation. Restore aborts
    /// before touching live data.
    #[error("backup {id} failed validation: {reason}")]
    InvalidSnapshot { id: String, reason: String },

    /// Destructive operations never run without an explicit caller opt-in.
    #[error("destructive operation requires explicit confirmation")]
    ConfirmationRequired,
}

impl BackupError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
