//! Record model
//!
//! Records are schemaless beyond their id: each collection stores whatever
//! fields the application wrote, and the sync engine only interprets the
//! timestamp fallback chain used for last-write-wins comparison.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names probed, in order, to derive a record's effective timestamp.
const TIMESTAMP_FIELDS: [&str; 4] = ["timestamp", "createdAt", "date", "time"];

/// A unique identifier for a record within its collection.
///
/// Stored as a string; payloads written by other devices may carry numeric
/// ids, which are canonicalized to their decimal string form on read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(String);

impl RecordId {
    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
            Float(f64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Ok(Self(text)),
            Raw::Int(number) => Ok(Self(number.to_string())),
            Raw::Float(number) => Ok(Self(number.to_string())),
        }
    }
}

/// A record in a synchronized collection: `{ id, ...fields }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier within the collection
    pub id: RecordId,
    /// All remaining fields, verbatim
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record with the given id and no fields.
    #[must_use]
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a field. The `id` field is fixed at construction and ignored here.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key != "id" {
            self.fields.insert(key, value.into());
        }
    }

    /// Get a field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The epoch-millisecond timestamp used for last-write-wins comparison.
    ///
    /// Probes `timestamp`, `createdAt`, `date`, then `time`; numbers pass
    /// through as epoch milliseconds, strings are parsed as dates. A record
    /// with no usable value gets 0 (epoch) and loses any conflict.
    #[must_use]
    pub fn effective_timestamp(&self) -> i64 {
        TIMESTAMP_FIELDS
            .iter()
            .find_map(|field| parse_timestamp(self.fields.get(*field)?))
            .unwrap_or(0)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => parse_date_string(text),
        _ => None,
    }
}

fn parse_date_string(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp_millis());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(parsed.and_utc().timestamp_millis());
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(parsed.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
    }
    None
}
