//! Integrity check: record-to-chunk uniqueness and index-to-record
//! consistency.
//!
//! Expected inconsistencies (duplicates, stale index entries, count drift)
//! are collected as issues. Only unreadable storage propagates as an error.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::IntegrityReport;
use crate::chunk::{ChunkError, ChunkStore};
use crate::index::{IndexKind, IndexManager};
use crate::record::Record;

/// Walks one collection's chunks and indexes.
pub fn check_collection(
    store: &mut ChunkStore,
    indexes: &IndexManager,
) -> Result<IntegrityReport, ChunkError> {
    let mut issues = Vec::new();

    // Record -> chunk uniqueness plus manifest count drift.
    let mut seen: HashMap<String, u64> = HashMap::new();
    let mut live: Vec<Record> = Vec::new();
    let mut deleted_ids: HashSet<String> = HashSet::new();

    let entries: Vec<(u64, usize, usize)> = store
        .manifest()
        .chunks
        .iter()
        .map(|e| (e.chunk_id, e.items, e.live))
        .collect();

    for (chunk_id, manifest_items, manifest_live) in entries {
        let chunk = store.get_chunk(chunk_id)?;
        if chunk.len() != manifest_items || chunk.live_count() != manifest_live {
            issues.push(format!(
                "chunk {}: manifest records {}/{} items/live but file holds {}/{}",
                chunk_id,
                manifest_items,
                manifest_live,
                chunk.len(),
                chunk.live_count()
            ));
        }
        for record in &chunk.items {
            if let Some(previous) = seen.insert(record.id.clone(), chunk_id) {
                issues.push(format!(
                    "record {} appears in chunk {} and chunk {}",
                    record.id, previous, chunk_id
                ));
            }
            if record.deleted {
                deleted_ids.insert(record.id.clone());
            } else {
                live.push(record.clone());
            }
        }
    }

    // Index-to-record consistency, checked through the hash indexes where
    // membership is exact.
    for record in &live {
        for (field, kind) in indexes.registered() {
            if kind != IndexKind::Hash {
                continue;
            }
            let Some(value) = record.field(field) else {
                continue;
            };
            if !indexed_values(&value)
                .iter()
                .all(|v| index_contains(indexes, field, v, &record.id))
            {
                issues.push(format!(
                    "live record {} missing from {} hash index",
                    record.id, field
                ));
            }
        }
    }

    // A hash index entry pointing at an id the store does not know is stale
    // beyond what tombstones explain.
    for (field, kind) in indexes.registered() {
        if kind != IndexKind::Hash {
            continue;
        }
        for id in indexes.all_ids(field, kind) {
            if !seen.contains_key(&id) {
                issues.push(format!(
                    "{} hash index references unknown record {}",
                    field, id
                ));
            } else if deleted_ids.contains(&id) {
                issues.push(format!(
                    "{} hash index still lists soft-deleted record {} as live",
                    field, id
                ));
            }
        }
    }

    Ok(IntegrityReport {
        healthy: issues.is_empty(),
        issues,
    })
}

fn indexed_values(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn index_contains(indexes: &IndexManager, field: &str, value: &Value, id: &str) -> bool {
    indexes
        .lookup_eq(field, value)
        .map(|ids| ids.contains(id))
        .unwrap_or(true)
}
