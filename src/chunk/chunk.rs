//! In-memory chunk representation.

use crate::record::Record;

/// A bounded partition of a collection's records.
///
/// Invariant: `items.len() <= capacity` except transiently during a split.
/// Every record id appears in exactly one chunk across the store.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub chunk_id: u64,
    pub items: Vec<Record>,
    /// Set when the in-memory copy diverges from the on-disk file.
    pub dirty: bool,
}

impl Chunk {
    pub fn new(chunk_id: u64) -> Self {
        Self {
            chunk_id,
            items: Vec::new(),
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.items.iter().filter(|r| !r.deleted).count()
    }

    pub fn deleted_count(&self) -> usize {
        self.items.iter().filter(|r| r.deleted).count()
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.items.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        self.items.iter_mut().find(|r| r.id == id)
    }

    /// Splits off the upper half into a new chunk, leaving roughly equal
    /// halves. Called immediately when an insert overflows the capacity.
    pub fn split(&mut self, new_chunk_id: u64) -> Chunk {
        let mid = self.items.len() / 2;
        let upper = self.items.split_off(mid);
        self.dirty = true;
        Chunk {
            chunk_id: new_chunk_id,
            items: upper,
            dirty: true,
        }
    }
}
