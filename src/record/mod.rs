//! Record model: the durable unit the chunk store owns.

mod entity;

pub use entity::Entity;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One durable record. The id is unique across the collection and immutable;
/// every record is owned by exactly one chunk at a time. Deletion is a soft
/// flag until compaction reclaims the slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub entity: Entity,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(id: impl Into<String>, entity: Entity) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            entity,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Flattened field view (entity fields plus the `kind` discriminant).
    pub fn fields(&self) -> BTreeMap<String, Value> {
        self.entity.fields()
    }

    /// Looks up a single field by name in the flattened view.
    pub fn field(&self, name: &str) -> Option<Value> {
        self.entity.fields().remove(name)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("record id must be non-empty".to_string());
        }
        self.entity.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_id_is_rejected() {
        let record = Record::new(
            "",
            Entity::Note {
                title: "scratch".to_string(),
                folder: String::new(),
                body: String::new(),
                tags: Vec::new(),
            },
        );
        assert!(record.validate().is_err());
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = Record::new(
            "n-1",
            Entity::Note {
                title: "groceries".to_string(),
                folder: "lists".to_string(),
                body: "milk, eggs".to_string(),
                tags: vec!["errands".to_string()],
            },
        );
        let raw = serde_json::to_string(&record).unwrap();
        let parsed: Record = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, record);
    }
}
