//! Index manager: one structure per (field, kind) pair.
//!
//! Indexes are updated incrementally on every upsert. Soft deletes tombstone
//! the record id instead of removing postings, so deletes stay cheap; lookups
//! subtract tombstones and compaction clears them with a full rebuild.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{IndexError, IndexResult};
use super::tokenize::tokenize;
use crate::config::IndexSpec;
use crate::fsx;
use crate::record::Record;

/// The three index shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Exact match: value key -> set of record ids.
    Hash,
    /// Sorted keys supporting interval queries.
    Range,
    /// Tokenized inverted index: token -> set of record ids.
    Fulltext,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Range => "range",
            Self::Fulltext => "fulltext",
        }
    }
}

/// Persisted form of one index, `indexes/<field>_<kind>.json`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct IndexData {
    /// Key -> posting set. For hash/range the key is the encoded field
    /// value; for fulltext it is a token.
    entries: BTreeMap<String, BTreeSet<String>>,
    /// Record ids soft-deleted since the last rebuild. Subtracted on lookup.
    tombstones: BTreeSet<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    field: String,
    kind: IndexKind,
    #[serde(flatten)]
    data: IndexData,
}

#[derive(Debug)]
struct IndexSlot {
    field: String,
    kind: IndexKind,
    data: IndexData,
    dirty: bool,
}

impl IndexSlot {
    fn file_name(&self) -> String {
        format!("{}_{}.json", self.field, self.kind.as_str())
    }

    fn insert_record(&mut self, record: &Record) {
        let Some(value) = record.field(&self.field) else {
            return;
        };
        for key in keys_for(self.kind, &value) {
            self.data
                .entries
                .entry(key)
                .or_default()
                .insert(record.id.clone());
        }
        self.data.tombstones.remove(&record.id);
        self.dirty = true;
    }

    fn remove_record(&mut self, record: &Record) {
        let Some(value) = record.field(&self.field) else {
            return;
        };
        for key in keys_for(self.kind, &value) {
            if let Some(ids) = self.data.entries.get_mut(&key) {
                ids.remove(&record.id);
                if ids.is_empty() {
                    self.data.entries.remove(&key);
                }
            }
        }
        self.dirty = true;
    }

    fn tombstone(&mut self, record_id: &str) {
        self.data.tombstones.insert(record_id.to_string());
        self.dirty = true;
    }

    fn live_ids(&self, key: &str) -> BTreeSet<String> {
        self.data
            .entries
            .get(key)
            .map(|ids| ids.difference(&self.data.tombstones).cloned().collect())
            .unwrap_or_default()
    }
}

/// Encodes a field value into lookup keys for the given index kind.
///
/// Hash indexes expand arrays (e.g. tags) into one key per element. Range
/// keys are zero-padded so lexicographic order matches numeric order for the
/// non-negative numbers and ISO dates this store carries.
fn keys_for(kind: IndexKind, value: &Value) -> Vec<String> {
    match kind {
        IndexKind::Hash => match value {
            Value::Array(items) => items.iter().filter_map(scalar_key).collect(),
            other => scalar_key(other).into_iter().collect(),
        },
        IndexKind::Range => range_key(value).into_iter().collect(),
        IndexKind::Fulltext => match value {
            Value::String(s) => tokenize(s),
            _ => Vec::new(),
        },
    }
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn range_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(format!("{:020}", u))
            } else {
                n.as_f64().map(|f| format!("{:024.6}", f))
            }
        }
        _ => None,
    }
}

/// Manages every registered index of one collection.
pub struct IndexManager {
    dir: PathBuf,
    slots: Vec<IndexSlot>,
}

impl IndexManager {
    /// Opens the indexes directory, loading whatever persisted structures
    /// exist for the registered specs. Missing files start empty.
    pub fn open(dir: impl Into<PathBuf>, specs: &[IndexSpec]) -> IndexResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| IndexError::io(&dir, e))?;

        let mut slots = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut slot = IndexSlot {
                field: spec.field.clone(),
                kind: spec.kind,
                data: IndexData::default(),
                dirty: false,
            };
            let path = dir.join(slot.file_name());
            match std::fs::read(&path) {
                Ok(bytes) => {
                    let file: IndexFile = serde_json::from_slice(&bytes)
                        .map_err(|e| IndexError::malformed(&path, e.to_string()))?;
                    slot.data = file.data;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(IndexError::io(&path, e)),
            }
            slots.push(slot);
        }
        Ok(Self { dir, slots })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn has_index(&self, field: &str, kind: IndexKind) -> bool {
        self.slots.iter().any(|s| s.field == field && s.kind == kind)
    }

    pub fn registered(&self) -> impl Iterator<Item = (&str, IndexKind)> {
        self.slots.iter().map(|s| (s.field.as_str(), s.kind))
    }

    /// Incremental update after an upsert. `previous` is the record as it was
    /// before the write (None for a create); its postings are removed so a
    /// changed field value does not leave a stale entry behind.
    pub fn apply_upsert(&mut self, record: &Record, previous: Option<&Record>) {
        for slot in &mut self.slots {
            if let Some(prev) = previous {
                slot.remove_record(prev);
            }
            if record.deleted {
                slot.tombstone(&record.id);
            } else {
                slot.insert_record(record);
            }
        }
    }

    /// Tombstones a soft-deleted record in every index. Postings stay until
    /// the next rebuild.
    pub fn apply_delete(&mut self, record_id: &str) {
        for slot in &mut self.slots {
            slot.tombstone(record_id);
        }
    }

    /// Drops everything and reindexes the given live records. Clears
    /// tombstones; run by compaction after a generation swap.
    pub fn rebuild<'a>(&mut self, records: impl Iterator<Item = &'a Record>) {
        for slot in &mut self.slots {
            slot.data = IndexData::default();
            slot.dirty = true;
        }
        for record in records {
            if record.deleted {
                continue;
            }
            for slot in &mut self.slots {
                slot.insert_record(record);
            }
        }
    }

    /// Exact-match lookup through the hash index. `None` means no such index
    /// is registered and the caller must scan.
    pub fn lookup_eq(&self, field: &str, value: &Value) -> Option<BTreeSet<String>> {
        let slot = self.slot(field, IndexKind::Hash)?;
        let keys = keys_for(IndexKind::Hash, value);
        let mut out = BTreeSet::new();
        for key in keys {
            out.extend(slot.live_ids(&key));
        }
        Some(out)
    }

    /// Interval lookup through the range index. Open bounds are allowed on
    /// either side.
    pub fn lookup_range(
        &self,
        field: &str,
        min: Option<&Value>,
        max: Option<&Value>,
    ) -> Option<BTreeSet<String>> {
        let slot = self.slot(field, IndexKind::Range)?;
        let min_key = min.and_then(range_key);
        let max_key = max.and_then(range_key);

        let mut out = BTreeSet::new();
        for (key, ids) in &slot.data.entries {
            if let Some(lo) = &min_key {
                if key < lo {
                    continue;
                }
            }
            if let Some(hi) = &max_key {
                if key > hi {
                    continue;
                }
            }
            out.extend(ids.difference(&slot.data.tombstones).cloned());
        }
        Some(out)
    }

    /// Token lookup against one field's fulltext index. Returns matched ids
    /// with the number of query tokens each matched.
    pub fn lookup_text(&self, field: &str, query: &str) -> Option<HashMap<String, usize>> {
        let slot = self.slot(field, IndexKind::Fulltext)?;
        Some(Self::score_tokens(slot, query))
    }

    /// Scores `query` against every registered fulltext index. `None` when
    /// no fulltext index exists at all.
    pub fn search(&self, query: &str) -> Option<HashMap<String, usize>> {
        let fulltext: Vec<&IndexSlot> = self
            .slots
            .iter()
            .filter(|s| s.kind == IndexKind::Fulltext)
            .collect();
        if fulltext.is_empty() {
            return None;
        }
        let mut scores: HashMap<String, usize> = HashMap::new();
        for slot in fulltext {
            for (id, hits) in Self::score_tokens(slot, query) {
                *scores.entry(id).or_default() += hits;
            }
        }
        Some(scores)
    }

    /// Every id one index currently lists as live (postings minus
    /// tombstones). Used by the integrity check.
    pub fn all_ids(&self, field: &str, kind: IndexKind) -> BTreeSet<String> {
        let Some(slot) = self.slot(field, kind) else {
            return BTreeSet::new();
        };
        let mut out = BTreeSet::new();
        for ids in slot.data.entries.values() {
            out.extend(ids.difference(&slot.data.tombstones).cloned());
        }
        out
    }

    /// Writes every dirty index atomically.
    pub fn persist(&mut self) -> IndexResult<()> {
        for slot in &mut self.slots {
            if !slot.dirty {
                continue;
            }
            let path = self.dir.join(slot.file_name());
            let file = IndexFile {
                field: slot.field.clone(),
                kind: slot.kind,
                data: slot.data.clone(),
            };
            fsx::atomic_write_json(&path, &file).map_err(|e| IndexError::io(&path, e))?;
            slot.dirty = false;
        }
        Ok(())
    }

    fn slot(&self, field: &str, kind: IndexKind) -> Option<&IndexSlot> {
        self.slots.iter().find(|s| s.field == field && s.kind == kind)
    }

    fn score_tokens(slot: &IndexSlot, query: &str) -> HashMap<String, usize> {
        let mut scores: HashMap<String, usize> = HashMap::new();
        for token in tokenize(query) {
            for id in slot.live_ids(&token) {
                *scores.entry(id).or_default() += 1;
            }
        }
        scores
    }
}

/// Intersects candidate sets smallest-first to keep intermediate sets small.
pub fn intersect_smallest_first(mut sets: Vec<BTreeSet<String>>) -> BTreeSet<String> {
    if sets.is_empty() {
        return BTreeSet::new();
    }
    sets.sort_by_key(BTreeSet::len);
    let mut result = sets.remove(0);
    for set in &sets {
        result.retain(|id| set.contains(id));
        if result.is_empty() {
            break;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Entity;
    use tempfile::TempDir;

    fn specs() -> Vec<IndexSpec> {
        vec![
            IndexSpec::new("status", IndexKind::Hash),
            IndexSpec::new("due_date", IndexKind::Range),
            IndexSpec::new("title", IndexKind::Fulltext),
        ]
    }

    fn task(id: &str, title: &str, status: &str, due: Option<&str>) -> Record {
        Record::new(
            id,
            Entity::Task {
                title: title.to_string(),
                column: "todo".to_string(),
                status: status.to_string(),
                description: String::new(),
                priority: None,
                due_date: due.map(str::to_string),
                tags: Vec::new(),
            },
        )
    }

    #[test]
    fn hash_lookup_after_upsert() {
        let dir = TempDir::new().unwrap();
        let mut indexes = IndexManager::open(dir.path(), &specs()).unwrap();
        indexes.apply_upsert(&task("t-1", "write report", "open", None), None);
        indexes.apply_upsert(&task("t-2", "review report", "done", None), None);

        let open = indexes.lookup_eq("status", &Value::from("open")).unwrap();
        assert_eq!(open.len(), 1);
        assert!(open.contains("t-1"));
    }

    #[test]
    fn update_removes_stale_postings() {
        let dir = TempDir::new().unwrap();
        let mut indexes = IndexManager::open(dir.path(), &specs()).unwrap();
        let before = task("t-1", "write report", "open", None);
        indexes.apply_upsert(&before, None);
        let after = task("t-1", "write report", "done", None);
        indexes.apply_upsert(&after, Some(&before));

        assert!(indexes
            .lookup_eq("status", &Value::from("open"))
            .unwrap()
            .is_empty());
        assert!(indexes
            .lookup_eq("status", &Value::from("done"))
            .unwrap()
            .contains("t-1"));
    }

    #[test]
    fn tombstoned_ids_are_subtracted_from_lookups() {
        let dir = TempDir::new().unwrap();
        let mut indexes = IndexManager::open(dir.path(), &specs()).unwrap();
        indexes.apply_upsert(&task("t-1", "write report", "open", None), None);
        indexes.apply_delete("t-1");

        assert!(indexes
            .lookup_eq("status", &Value::from("open"))
            .unwrap()
            .is_empty());
        assert!(indexes.search("report").unwrap().is_empty());
    }

    #[test]
    fn range_lookup_honors_open_bounds() {
        let dir = TempDir::new().unwrap();
        let mut indexes = IndexManager::open(dir.path(), &specs()).unwrap();
        indexes.apply_upsert(&task("t-1", "a", "open", Some("2026-01-10")), None);
        indexes.apply_upsert(&task("t-2", "b", "open", Some("2026-03-05")), None);
        indexes.apply_upsert(&task("t-3", "c", "open", Some("2026-06-01")), None);

        let until_april = indexes
            .lookup_range("due_date", None, Some(&Value::from("2026-04-01")))
            .unwrap();
        assert_eq!(until_april.len(), 2);
        assert!(until_april.contains("t-1") && until_april.contains("t-2"));
    }

    #[test]
    fn persisted_indexes_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut indexes = IndexManager::open(dir.path(), &specs()).unwrap();
            indexes.apply_upsert(&task("t-1", "write report", "open", None), None);
            indexes.persist().unwrap();
        }
        let indexes = IndexManager::open(dir.path(), &specs()).unwrap();
        assert!(indexes
            .lookup_eq("status", &Value::from("open"))
            .unwrap()
            .contains("t-1"));
    }

    #[test]
    fn rebuild_clears_tombstones() {
        let dir = TempDir::new().unwrap();
        let mut indexes = IndexManager::open(dir.path(), &specs()).unwrap();
        let live = task("t-1", "write report", "open", None);
        indexes.apply_upsert(&live, None);
        indexes.apply_delete("t-2");

        let records = vec![live];
        indexes.rebuild(records.iter());
        assert!(indexes
            .lookup_eq("status", &Value::from("open"))
            .unwrap()
            .contains("t-1"));
    }

    #[test]
    fn intersection_runs_smallest_first() {
        let big: BTreeSet<String> = (0..100).map(|i| format!("id-{}", i)).collect();
        let small: BTreeSet<String> = ["id-3", "id-7"].iter().map(|s| s.to_string()).collect();
        let result = intersect_smallest_first(vec![big, small]);
        assert_eq!(result.len(), 2);
    }
}
