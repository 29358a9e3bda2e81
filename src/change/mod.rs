//! Change detection: diffs in-memory collection state against a committed
//! snapshot so the save path can skip work when nothing changed.

mod detector;

pub use detector::ChangeDetector;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Classification of one record's mutation since the last snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    /// Only placement fields (column, folder) changed.
    Move,
    /// Only the display key (title, name) changed.
    Rename,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Move => "move",
            Self::Rename => "rename",
        }
    }
}

/// One field-level difference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    pub field: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// One classified mutation. Transient: produced per detection cycle, never
/// persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeRecord {
    pub record_id: String,
    pub kind: ChangeKind,
    pub field_diffs: Vec<FieldDiff>,
    pub timestamp: DateTime<Utc>,
}

/// Result of one detection cycle.
#[derive(Debug, Clone, Default)]
pub struct DetectionReport {
    pub has_uncommitted_changes: bool,
    pub total_changes: usize,
    pub by_kind: BTreeMap<ChangeKind, usize>,
    pub changes: Vec<ChangeRecord>,
}

/// Tracking state for one collection.
#[derive(Debug, Clone)]
pub struct ChangeSummary {
    pub collection: String,
    pub session_id: Uuid,
    pub tracking_since: DateTime<Utc>,
    pub last_detection: Option<DateTime<Utc>>,
    pub pending_changes: usize,
}
