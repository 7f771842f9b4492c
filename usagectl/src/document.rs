//! Message documents as stored in the container.
//!
//! Documents are semi-structured, so [`Document`] keeps the full JSON object and only interprets the
//! handful of attributes the migration touches. Everything else is written back untouched.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{Error, Result};

pub const ID_FIELD: &str = "id";
pub const ROLE_FIELD: &str = "role";
pub const TYPE_FIELD: &str = "type";
pub const USAGE_FIELD: &str = "usage";
pub const UPDATED_AT_FIELD: &str = "updatedAt";
pub const UPDATED_BY_FIELD: &str = "updatedBy";

/// Token counters attached to assistant messages.
///
/// The migration only ever writes the empty form (all counters `null`); populated values are
/// produced elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub completion_tokens: Option<u64>,
    pub prompt_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl Usage {
    /// Usage with every counter unset.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.completion_tokens.is_none() && self.prompt_tokens.is_none() && self.total_tokens.is_none()
    }
}

/// A single document, kept as its raw JSON object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Wrap a JSON value, rejecting anything that is not an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(Error::MalformedDocument {
                message: format!("expected a JSON object, got {other}"),
            }),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.get_str(ID_FIELD)
    }

    /// The identifier, or a `MalformedDocument` error for documents without one.
    pub fn require_id(&self) -> Result<&str> {
        self.id().ok_or_else(|| Error::MalformedDocument {
            message: "document has no string `id`".to_string(),
        })
    }

    pub fn role(&self) -> Option<&str> {
        self.get_str(ROLE_FIELD)
    }

    /// Partition key value for point reads and writes.
    ///
    /// `path` names a top-level attribute, with or without a leading `/`. Documents that lack the
    /// attribute are addressed by their id, matching how the container was populated.
    pub fn partition_key(&self, path: &str) -> Result<Value> {
        let attribute = path.trim_start_matches('/');
        match self.0.get(attribute) {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => self.require_id().map(|id| Value::String(id.to_string())),
        }
    }

    /// Whether `usage` is defined. A `null` value still counts as defined.
    pub fn has_usage(&self) -> bool {
        self.0.contains_key(USAGE_FIELD)
    }

    /// Parsed `usage`, if present and well formed.
    pub fn usage(&self) -> Option<Usage> {
        self.0
            .get(USAGE_FIELD)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn set_usage(&mut self, usage: &Usage) {
        // Usage only holds optional integers, serialization cannot fail
        let value = serde_json::to_value(usage).unwrap_or(Value::Null);
        self.0.insert(USAGE_FIELD.to_string(), value);
    }

    pub fn remove_usage(&mut self) -> Option<Value> {
        self.0.remove(USAGE_FIELD)
    }

    pub fn updated_by(&self) -> Option<&Value> {
        self.0.get(UPDATED_BY_FIELD)
    }

    /// Record who changed the document and when.
    pub fn stamp(&mut self, at: DateTime<Utc>, by: Value) {
        self.0.insert(UPDATED_AT_FIELD.to_string(), Value::String(format_timestamp(at)));
        self.0.insert(UPDATED_BY_FIELD.to_string(), by);
    }
}

/// UTC timestamp in the `2024-01-31T09:15:00.123456Z` form used by the rest of the container.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
