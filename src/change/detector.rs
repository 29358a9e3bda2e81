//! The change detector.
//!
//! Keeps one snapshot per collection as the diff baseline. Detection is a
//! deep field-level diff of the current state against that snapshot;
//! `mark_changes_committed` replaces the baseline wholesale with the last
//! observed state and is the only mutation to it. Debouncing of rapid edits
//! lives in the maintenance scheduler, not here; this type is synchronous
//! and storage-independent.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ChangeKind, ChangeRecord, ChangeSummary, DetectionReport, FieldDiff};
use crate::record::Record;

#[derive(Debug, Clone)]
struct Snapshot {
    session_id: Uuid,
    captured_at: DateTime<Utc>,
    records: BTreeMap<String, Record>,
}

impl Snapshot {
    fn capture(records: &[Record]) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            captured_at: Utc::now(),
            records: records.iter().map(|r| (r.id.clone(), r.clone())).collect(),
        }
    }
}

/// Per-collection change tracking.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    snapshots: HashMap<String, Snapshot>,
    /// Current state as of the most recent detection, promoted to the
    /// baseline on commit.
    observed: HashMap<String, BTreeMap<String, Record>>,
    last_detection: HashMap<String, (DateTime<Utc>, usize)>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins tracking a collection with the given baseline state.
    pub fn start_tracking(&mut self, collection: &str, initial: &[Record]) {
        self.snapshots
            .insert(collection.to_string(), Snapshot::capture(initial));
        self.observed.remove(collection);
        self.last_detection.remove(collection);
    }

    pub fn is_tracking(&self, collection: &str) -> bool {
        self.snapshots.contains_key(collection)
    }

    /// Diffs `current` against the snapshot and classifies every mutation.
    /// A collection not yet tracked is treated as starting from empty, so
    /// every record classifies as a create.
    pub fn detect_changes(&mut self, collection: &str, current: &[Record]) -> DetectionReport {
        if !self.is_tracking(collection) {
            self.start_tracking(collection, &[]);
        }
        let snapshot = &self.snapshots[collection];

        let current_by_id: BTreeMap<String, Record> =
            current.iter().map(|r| (r.id.clone(), r.clone())).collect();

        let mut changes = Vec::new();
        let now = Utc::now();

        for (id, record) in &current_by_id {
            match snapshot.records.get(id) {
                None => {
                    if !record.deleted {
                        changes.push(ChangeRecord {
                            record_id: id.clone(),
                            kind: ChangeKind::Create,
                            field_diffs: diff_fields(None, Some(record)),
                            timestamp: now,
                        });
                    }
                }
                Some(baseline) => {
                    if record.deleted && !baseline.deleted {
                        changes.push(ChangeRecord {
                            record_id: id.clone(),
                            kind: ChangeKind::Delete,
                            field_diffs: diff_fields(Some(baseline), None),
                            timestamp: now,
                        });
                        continue;
                    }
                    let diffs = diff_fields(Some(baseline), Some(record));
                    if diffs.is_empty() {
                        continue;
                    }
                    changes.push(ChangeRecord {
                        record_id: id.clone(),
                        kind: classify(record, &diffs),
                        field_diffs: diffs,
                        timestamp: now,
                    });
                }
            }
        }

        for (id, baseline) in &snapshot.records {
            if baseline.deleted || current_by_id.contains_key(id) {
                continue;
            }
            changes.push(ChangeRecord {
                record_id: id.clone(),
                kind: ChangeKind::Delete,
                field_diffs: diff_fields(Some(baseline), None),
                timestamp: now,
            });
        }

        let mut by_kind: BTreeMap<ChangeKind, usize> = BTreeMap::new();
        for change in &changes {
            *by_kind.entry(change.kind).or_default() += 1;
        }

        self.observed.insert(collection.to_string(), current_by_id);
        self.last_detection
            .insert(collection.to_string(), (now, changes.len()));

        DetectionReport {
            has_uncommitted_changes: !changes.is_empty(),
            total_changes: changes.len(),
            by_kind,
            changes,
        }
    }

    /// Replaces the baseline wholesale with the last observed state. The
    /// only mutation to a collection's snapshot.
    pub fn mark_changes_committed(&mut self, collection: &str) {
        if let Some(observed) = self.observed.remove(collection) {
            let session_id = self
                .snapshots
                .get(collection)
                .map(|s| s.session_id)
                .unwrap_or_else(Uuid::new_v4);
            self.snapshots.insert(
                collection.to_string(),
                Snapshot {
                    session_id,
                    captured_at: Utc::now(),
                    records: observed,
                },
            );
        }
        self.last_detection
            .entry(collection.to_string())
            .and_modify(|(_, pending)| *pending = 0);
    }

    pub fn get_change_summary(&self, collection: &str) -> Option<ChangeSummary> {
        let snapshot = self.snapshots.get(collection)?;
        let (last_detection, pending) = self
            .last_detection
            .get(collection)
            .map(|(t, n)| (Some(*t), *n))
            .unwrap_or((None, 0));
        Some(ChangeSummary {
            collection: collection.to_string(),
            session_id: snapshot.session_id,
            tracking_since: snapshot.captured_at,
            last_detection,
            pending_changes: pending,
        })
    }
}

/// Deep field-level diff of two versions of one record. Bookkeeping
/// timestamps are not part of the payload and never count as a difference.
fn diff_fields(before: Option<&Record>, after: Option<&Record>) -> Vec<FieldDiff> {
    let before_fields = before.map(Record::fields).unwrap_or_default();
    let after_fields = after.map(Record::fields).unwrap_or_default();

    let mut names: Vec<&String> = before_fields.keys().chain(after_fields.keys()).collect();
    names.sort();
    names.dedup();

    let mut diffs = Vec::new();
    for name in names {
        let b = before_fields.get(name);
        let a = after_fields.get(name);
        if b != a {
            diffs.push(FieldDiff {
                field: name.clone(),
                before: b.cloned(),
                after: a.cloned(),
            });
        }
    }
    diffs
}

/// Classification rule for a record present in both states:
/// placement-only diff is a move, display-key-only diff is a rename,
/// anything else is an update.
fn classify(record: &Record, diffs: &[FieldDiff]) -> ChangeKind {
    let placement = record.entity.placement_fields();
    let display = record.entity.display_field();

    if diffs.iter().all(|d| placement.contains(&d.field.as_str())) {
        return ChangeKind::Move;
    }
    if diffs.len() == 1 && diffs[0].field == display {
        return ChangeKind::Rename;
    }
    ChangeKind::Update
}
