//! Collected records and their audit trail
//!
//! A record is identified by `(external_id, source)`. Everything else is an open,
//! source-defined field set plus store-managed timestamps and change log.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity of a record. Never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub external_id: String,
    pub source: String,
}

impl RecordKey {
    pub fn new(external_id: &str, source: &str) -> Self {
        Self {
            external_id: external_id.to_string(),
            source: source.to_string(),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.source, self.external_id)
    }
}

/// Kind of change recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Insert,
    Update,
}

/// One audit entry. `payload` holds the full record on insert and only the
/// changed fields on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: ChangeAction,
    pub payload: Value,
}

/// A collected item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub external_id: String,
    pub source: String,

    //=== Store-managed ===
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub change_log: Vec<ChangeLogEntry>,

    /// Source-defined attributes (price, title, photos, year, ...)
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record with no attributes
    pub fn new(external_id: &str, source: &str) -> Self {
        let now = Utc::now();
        Self {
            external_id: external_id.to_string(),
            source: source.to_string(),
            created_at: now,
            updated_at: now,
            change_log: Vec::new(),
            fields: Map::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.external_id, &self.source)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Fields of `incoming` whose canonical serialization differs from ours.
    ///
    /// Only fields present in `incoming` are considered; fields we have that the
    /// incoming set lacks are left alone.
    pub fn diff(&self, incoming: &Map<String, Value>) -> Map<String, Value> {
        incoming
            .iter()
            .filter(|(name, value)| match self.fields.get(*name) {
                Some(current) => canonical(current) != canonical(value),
                None => true,
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Initialize store-managed fields for a first sighting
    pub fn prepare_insert(&mut self, now: DateTime<Utc>) {
        self.created_at = now;
        self.updated_at = now;
        self.change_log = vec![ChangeLogEntry {
            timestamp: now,
            action: ChangeAction::Insert,
            payload: self.audit_payload(),
        }];
    }

    /// Apply a non-empty minimal update set and audit it
    pub fn apply_update(&mut self, changes: Map<String, Value>, now: DateTime<Utc>) {
        for (name, value) in &changes {
            self.fields.insert(name.clone(), value.clone());
        }
        self.updated_at = now;
        self.change_log.push(ChangeLogEntry {
            timestamp: now,
            action: ChangeAction::Update,
            payload: Value::Object(changes),
        });
    }

    /// Record as seen by filters: identity, timestamps and attributes, without the change log
    pub fn filter_view(&self) -> Value {
        let mut view = self.fields.clone();
        view.insert("external_id".to_string(), Value::String(self.external_id.clone()));
        view.insert("source".to_string(), Value::String(self.source.clone()));
        // Fixed-width UTC form so timestamps order lexically
        view.insert(
            "created_at".to_string(),
            Value::String(self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        view.insert(
            "updated_at".to_string(),
            Value::String(self.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        Value::Object(view)
    }

    fn audit_payload(&self) -> Value {
        let mut payload = self.fields.clone();
        payload.insert("external_id".to_string(), Value::String(self.external_id.clone()));
        payload.insert("source".to_string(), Value::String(self.source.clone()));
        Value::Object(payload)
    }
}

/// Canonical serialized form used for equality
fn canonical(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
