//! Chunk store error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for chunk store operations.
pub type ChunkResult<T> = Result<T, ChunkError>;

/// Errors raised by the chunk store.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// File read/write failure.
    #[error("I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Checksum mismatch on a chunk file. Never ignored; the caller decides
    /// whether to fall back to a backup.
    #[error("checksum mismatch in {path}: expected {expected}, computed {computed}")]
    Corruption {
        path: PathBuf,
        expected: String,
        computed: String,
    },

    /// A chunk file that cannot be parsed at all.
    #[error("malformed chunk file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// A single record too large to store on its own.
    #[error("record {id} is {size} bytes, larger than the {limit}-byte record limit")]
    Capacity { id: String, size: usize, limit: usize },

    /// Lookup of a chunk id the manifest does not know.
    #[error("chunk {0} is not in the manifest")]
    UnknownChunk(u64),
}

impl ChunkError {
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

    /// True for checksum failures, which have a dedicated recovery path.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}
