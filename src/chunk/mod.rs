//! Chunked record storage.
//!
//! A collection's records live in bounded chunks, each persisted as one
//! durable JSON file. Writes are copy-on-write: a new version is written to a
//! temporary file and atomically renamed over the previous one. The manifest
//! defines the current generation; compaction commits by swapping it.

mod chunk;
mod errors;
mod manifest;
mod store;

pub use chunk::Chunk;
pub use errors::{ChunkError, ChunkResult};
pub use manifest::{Manifest, ManifestEntry};
pub use store::{ChunkCursor, ChunkStore, GenerationSwap, PreparedGeneration, UpsertOutcome};
