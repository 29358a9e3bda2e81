//! Compaction: reclaims space from soft-deleted records and rebalances
//! chunk sizes.

mod manager;

pub use manager::{CompactionManager, CompactionReport};

use thiserror::Error;

use crate::chunk::ChunkError;
use crate::index::IndexError;

pub type CompactResult<T> = Result<T, CompactError>;

#[derive(Debug, Error)]
pub enum CompactError {
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Index(#[from] IndexError),
}
