//! The typed entity union.
//!
//! Records are not arbitrary JSON blobs: every record body is one of the known
//! entity kinds, enforced by the serde tag at the deserialization boundary.
//! Unknown kinds or missing required fields fail to parse and are rejected
//! before anything touches disk.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A record body: one of the entity kinds the application knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Task {
        title: String,
        /// Board column the task sits in. A change here alone is a move.
        column: String,
        #[serde(default)]
        status: String,
        #[serde(default)]
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        due_date: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tags: Vec<String>,
    },
    Note {
        title: String,
        /// Folder the note lives in. A change here alone is a move.
        #[serde(default)]
        folder: String,
        #[serde(default)]
        body: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tags: Vec<String>,
    },
    Template {
        name: String,
        #[serde(default)]
        category: String,
        #[serde(default)]
        body: String,
    },
}

impl Entity {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Task { .. } => "task",
            Self::Note { .. } => "note",
            Self::Template { .. } => "template",
        }
    }

    /// The human-facing display key. A change to only this field classifies
    /// as a rename.
    pub fn display_field(&self) -> &'static str {
        match self {
            Self::Task { .. } | Self::Note { .. } => "title",
            Self::Template { .. } => "name",
        }
    }

    /// Placement fields: a change confined to these classifies as a move.
    pub fn placement_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Task { .. } => &["column"],
            Self::Note { .. } => &["folder"],
            Self::Template { .. } => &["category"],
        }
    }

    /// Schema validation beyond what the serde tag already enforces.
    pub fn validate(&self) -> Result<(), String> {
        let display = match self {
            Self::Task { title, .. } | Self::Note { title, .. } => title,
            Self::Template { name, .. } => name,
        };
        if display.trim().is_empty() {
            return Err(format!(
                "{} is missing a non-empty {}",
                self.kind(),
                self.display_field()
            ));
        }
        if let Self::Task { column, .. } = self {
            if column.trim().is_empty() {
                return Err("task is missing a non-empty column".to_string());
            }
        }
        Ok(())
    }

    /// Flattened field view used by indexing, filtering and diffing.
    ///
    /// Always an object because `Entity` serializes as a tagged struct.
    pub fn fields(&self) -> BTreeMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }
}
