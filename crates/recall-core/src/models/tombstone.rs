//! Deletion tombstones

use serde::{Deserialize, Serialize};

use super::record::RecordId;

/// Maximum tombstones retained per collection; oldest are dropped first.
pub const TOMBSTONE_RETENTION: usize = 200;

/// A marker recording that a record was deleted at a given time.
///
/// Prevents a stale copy of the record from reappearing during merges. The
/// `deleted_at` time only ever increases for a given id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    /// Id of the deleted record
    pub id: RecordId,
    /// Deletion time (Unix ms)
    pub deleted_at: i64,
}

impl Tombstone {
    /// Create a tombstone for the given record id.
    #[must_use]
    pub fn new(id: impl Into<RecordId>, deleted_at: i64) -> Self {
        Self {
            id: id.into(),
            deleted_at,
        }
    }
}

/// Sort tombstones by deletion time and keep the newest entries up to the
/// retention cap.
#[must_use]
pub fn cap_tombstones(mut tombstones: Vec<Tombstone>) -> Vec<Tombstone> {
    tombstones.sort_by(|a, b| {
        a.deleted_at
            .cmp(&b.deleted_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    let excess = tombstones.len().saturating_sub(TOMBSTONE_RETENTION);
    tombstones.drain(..excess);
    tombstones
}
