//! Query execution.
//!
//! Plan: for each filter pick the most selective available index
//! (hash > range > fulltext); a predicate with no index forces a chunk scan.
//! Index candidate sets intersect smallest-first, then only the chunks
//! holding surviving ids are materialized. Every predicate is re-verified on
//! the materialized records, so index selection is purely a pruning decision
//! and can never change the result set.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use serde_json::Value;

use super::{Predicate, QueryError, QueryOptions, QueryOutput, QueryPerformance, SortOrder};
use crate::chunk::ChunkStore;
use crate::index::{intersect_smallest_first, tokenize, IndexKind, IndexManager};
use crate::record::Record;

pub struct QueryEngine;

impl QueryEngine {
    /// Runs one query against a collection's store and indexes.
    pub fn execute(
        store: &mut ChunkStore,
        indexes: &IndexManager,
        options: &QueryOptions,
    ) -> Result<QueryOutput, QueryError> {
        let started = Instant::now();
        let mut perf = QueryPerformance::default();

        let mut candidate_sets: Vec<BTreeSet<String>> = Vec::new();
        let mut forced_scan = options.filters.is_empty() && options.search.is_none();

        for (field, predicate) in &options.filters {
            match Self::index_candidates(indexes, field, predicate) {
                Some(ids) => candidate_sets.push(ids),
                None => forced_scan = true,
            }
        }

        // Fulltext scores, from the indexes when possible, otherwise from the
        // scan fallback below.
        let mut scores: Option<HashMap<String, usize>> = None;
        if let Some(query) = &options.search {
            match indexes.search(query) {
                Some(indexed) => {
                    candidate_sets.push(indexed.keys().cloned().collect());
                    scores = Some(indexed);
                }
                None => forced_scan = true,
            }
        }

        let mut items = if forced_scan {
            Self::scan_all(store, &mut perf)?
        } else {
            let ids = intersect_smallest_first(candidate_sets);
            Self::materialize(store, &ids, &mut perf)?
        };

        // Re-verify every predicate on the surviving records.
        items.retain(|record| {
            options
                .filters
                .iter()
                .all(|(field, predicate)| matches(record, field, predicate))
        });

        if let Some(query) = &options.search {
            let scored: Vec<(usize, Record)> = items
                .into_iter()
                .filter_map(|record| {
                    let score = match &scores {
                        Some(map) => map.get(&record.id).copied().unwrap_or(0),
                        None => scan_score(&record, query),
                    };
                    (score > 0).then_some((score, record))
                })
                .collect();
            items = Self::order_scored(scored, options);
        } else if let Some(sort) = &options.sort {
            items.sort_by(|a, b| compare_by_field(a, b, &sort.field, sort.order));
        }

        let offset = options.offset.unwrap_or(0);
        let items: Vec<Record> = items
            .into_iter()
            .skip(offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();

        perf.query_time_ms = started.elapsed().as_millis() as u64;
        Ok(QueryOutput {
            items,
            performance: perf,
        })
    }

    /// Index selection for one predicate: hash > range > fulltext, `None`
    /// when nothing applies and the predicate forces a scan.
    fn index_candidates(
        indexes: &IndexManager,
        field: &str,
        predicate: &Predicate,
    ) -> Option<BTreeSet<String>> {
        match predicate {
            Predicate::Equals(value) => {
                if let Some(ids) = indexes.lookup_eq(field, value) {
                    return Some(ids);
                }
                indexes.lookup_range(field, Some(value), Some(value))
            }
            Predicate::Range { min, max } => {
                indexes.lookup_range(field, min.as_ref(), max.as_ref())
            }
            Predicate::Contains(query) => {
                if !indexes.has_index(field, IndexKind::Fulltext) {
                    return None;
                }
                indexes
                    .lookup_text(field, query)
                    .map(|scores| scores.into_keys().collect())
            }
        }
    }

    /// Loads only the chunks that contain surviving candidate ids.
    fn materialize(
        store: &mut ChunkStore,
        ids: &BTreeSet<String>,
        perf: &mut QueryPerformance,
    ) -> Result<Vec<Record>, QueryError> {
        let mut by_chunk: HashMap<u64, Vec<&String>> = HashMap::new();
        for id in ids {
            if let Some(chunk_id) = store.chunk_of(id) {
                by_chunk.entry(chunk_id).or_default().push(id);
            }
        }

        // Manifest order keeps the unsorted result order stable.
        let chunk_order: Vec<u64> = store
            .manifest()
            .chunks
            .iter()
            .map(|e| e.chunk_id)
            .filter(|id| by_chunk.contains_key(id))
            .collect();

        let mut out = Vec::new();
        for chunk_id in chunk_order {
            let chunk = store.get_chunk(chunk_id)?;
            perf.chunks_read += 1;
            perf.items_scanned += chunk.len();
            out.extend(
                chunk
                    .items
                    .iter()
                    .filter(|r| !r.deleted && ids.contains(&r.id))
                    .cloned(),
            );
        }
        Ok(out)
    }

    fn scan_all(
        store: &mut ChunkStore,
        perf: &mut QueryPerformance,
    ) -> Result<Vec<Record>, QueryError> {
        let mut out = Vec::new();
        let mut cursor = store.iterate_chunks();
        while let Some(chunk) = cursor.next_chunk()? {
            perf.chunks_read += 1;
            perf.items_scanned += chunk.len();
            out.extend(chunk.items.iter().filter(|r| !r.deleted).cloned());
        }
        Ok(out)
    }

    /// Orders scored search results: explicit sort wins, otherwise score
    /// descending with record id as the stable tie-break.
    fn order_scored(mut scored: Vec<(usize, Record)>, options: &QueryOptions) -> Vec<Record> {
        match &options.sort {
            Some(sort) => {
                scored.sort_by(|a, b| compare_by_field(&a.1, &b.1, &sort.field, sort.order));
            }
            None => {
                scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
            }
        }
        scored.into_iter().map(|(_, record)| record).collect()
    }
}

/// Residual predicate check, applied to every materialized record.
fn matches(record: &Record, field: &str, predicate: &Predicate) -> bool {
    let value = record.field(field);
    match predicate {
        Predicate::Equals(expected) => match (&value, expected) {
            (Some(Value::Array(items)), expected) => items.contains(expected),
            (Some(actual), expected) => actual == expected,
            (None, _) => false,
        },
        Predicate::Range { min, max } => {
            let Some(actual) = value else {
                return false;
            };
            if let Some(lo) = min {
                if compare_values(&actual, lo) == Ordering::Less {
                    return false;
                }
            }
            if let Some(hi) = max {
                if compare_values(&actual, hi) == Ordering::Greater {
                    return false;
                }
            }
            true
        }
        Predicate::Contains(query) => {
            let Some(Value::String(text)) = value else {
                return false;
            };
            let tokens = tokenize(&text);
            tokenize(query).iter().all(|t| tokens.contains(t))
        }
    }
}

/// Fallback scoring when no fulltext index exists: matched query tokens
/// across all string fields.
fn scan_score(record: &Record, query: &str) -> usize {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return 0;
    }
    let mut record_tokens: BTreeSet<String> = BTreeSet::new();
    for value in record.fields().values() {
        if let Value::String(text) = value {
            record_tokens.extend(tokenize(text));
        }
    }
    query_tokens
        .iter()
        .filter(|t| record_tokens.contains(*t))
        .count()
}

fn compare_by_field(a: &Record, b: &Record, field: &str, order: SortOrder) -> Ordering {
    let ordering = match (a.field(field), b.field(field)) {
        (Some(va), Some(vb)) => compare_values(&va, &vb),
        // Records missing the sort field go last regardless of direction.
        (Some(_), None) => return Ordering::Less,
        (None, Some(_)) => return Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(na), Value::Number(nb)) => {
            let fa = na.as_f64().unwrap_or(f64::NAN);
            let fb = nb.as_f64().unwrap_or(f64::NAN);
            fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
        }
        (Value::String(sa), Value::String(sb)) => sa.cmp(sb),
        (Value::Bool(ba), Value::Bool(bb)) => ba.cmp(bb),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
