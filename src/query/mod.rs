//! Query planning and execution over the chunk store and its indexes.

mod engine;

pub use engine::QueryEngine;

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::chunk::ChunkError;
use crate::record::Record;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

/// One filter predicate over a single field.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Exact match (arrays match if any element matches).
    Equals(Value),
    /// Closed or half-open interval, inclusive on both ends.
    Range {
        min: Option<Value>,
        max: Option<Value>,
    },
    /// All query tokens appear in the field's tokenized text.
    Contains(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

/// Query input: filters combine via intersection; `search` scores and filters
/// through the fulltext indexes; sort and pagination apply last.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filters: BTreeMap<String, Predicate>,
    pub search: Option<String>,
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueryOptions {
    pub fn filter(mut self, field: impl Into<String>, predicate: Predicate) -> Self {
        self.filters.insert(field.into(), predicate);
        self
    }

    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(SortSpec {
            field: field.into(),
            order,
        });
        self
    }

    pub fn paginate(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }
}

/// Counters so callers and tests can assert index usage, not just results.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueryPerformance {
    pub chunks_read: usize,
    pub items_scanned: usize,
    pub query_time_ms: u64,
}

/// Query output: surviving records plus execution counters.
#[derive(Debug, Clone)]
pub struct QueryOutput {
    pub items: Vec<Record>,
    pub performance: QueryPerformance,
}
