//! Outgoing payload sanitization
//!
//! Remote transports have payload size limits. Rolling-history collections
//! are truncated to their most recent entries and oversized string fields
//! (typically base64 blobs the app never should have inlined) are dropped.
//! The local store is never touched; this applies to uploads only.

use serde_json::{Map, Value};

use crate::models::{Collection, Record, SyncSnapshot};

/// Rolling-history collections keep this many entries in uploads.
pub const MAX_HISTORY_ENTRIES: usize = 10;

/// String fields longer than this are dropped from uploaded records.
pub const MAX_STRING_FIELD_LEN: usize = 5000;

/// Produce a transport-bounded copy of the snapshot.
#[must_use]
pub fn sanitize_for_upload(snapshot: &SyncSnapshot) -> SyncSnapshot {
    let mut sanitized = snapshot.clone();

    for collection in [Collection::Conversations, Collection::Activities] {
        truncate_history(sanitized.data.records_mut(collection));
    }
    for collection in Collection::ALL {
        for record in sanitized.data.records_mut(collection).iter_mut() {
            prune_object(&mut record.fields);
        }
    }

    sanitized
}

/// Keep only the most recent entries, ordered oldest to newest.
fn truncate_history(records: &mut Vec<Record>) {
    records.sort_by_key(Record::effective_timestamp);
    let excess = records.len().saturating_sub(MAX_HISTORY_ENTRIES);
    records.drain(..excess);
}

fn prune_object(fields: &mut Map<String, Value>) {
    fields.retain(|_, value| !is_oversized_string(value));
    for value in fields.values_mut() {
        prune_value(value);
    }
}

fn prune_value(value: &mut Value) {
    match value {
        Value::Object(fields) => prune_object(fields),
        Value::Array(items) => {
            items.retain(|item| !is_oversized_string(item));
            for item in items.iter_mut() {
                prune_value(item);
            }
        }
        _ => {}
    }
}

fn is_oversized_string(value: &Value) -> bool {
    matches!(value, Value::String(text) if text.chars().count() > MAX_STRING_FIELD_LEN)
}
