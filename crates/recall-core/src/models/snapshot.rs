//! Sync snapshots
//!
//! A snapshot is a complete point-in-time capture of all tracked collections
//! and tombstone arrays from one side of a sync. Snapshots are built fresh
//! per cycle and never persisted as such.

use serde::{Deserialize, Serialize};

use super::collection::Collection;
use super::record::Record;
use super::tombstone::Tombstone;

/// Version tag carried in uploaded payloads.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The eight record collections plus the three tombstone arrays.
///
/// Missing arrays in a remote payload deserialize as empty, so partial
/// payloads written by older devices still merge cleanly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotData {
    pub tasks: Vec<Record>,
    pub notes: Vec<Record>,
    pub lists: Vec<Record>,
    pub conversations: Vec<Record>,
    pub settings: Vec<Record>,
    pub activities: Vec<Record>,
    pub daily_stats: Vec<Record>,
    pub activity_goals: Vec<Record>,
    pub deleted_tasks: Vec<Tombstone>,
    pub deleted_notes: Vec<Tombstone>,
    pub deleted_lists: Vec<Tombstone>,
}

impl SnapshotData {
    /// Records of the given collection.
    #[must_use]
    pub fn records(&self, collection: Collection) -> &[Record] {
        match collection {
            Collection::Tasks => &self.tasks,
            Collection::Notes => &self.notes,
            Collection::Lists => &self.lists,
            Collection::Conversations => &self.conversations,
            Collection::Settings => &self.settings,
            Collection::Activities => &self.activities,
            Collection::DailyStats => &self.daily_stats,
            Collection::ActivityGoals => &self.activity_goals,
        }
    }

    /// Mutable records of the given collection.
    pub fn records_mut(&mut self, collection: Collection) -> &mut Vec<Record> {
        match collection {
            Collection::Tasks => &mut self.tasks,
            Collection::Notes => &mut self.notes,
            Collection::Lists => &mut self.lists,
            Collection::Conversations => &mut self.conversations,
            Collection::Settings => &mut self.settings,
            Collection::Activities => &mut self.activities,
            Collection::DailyStats => &mut self.daily_stats,
            Collection::ActivityGoals => &mut self.activity_goals,
        }
    }

    /// Replace the records of the given collection.
    pub fn set_records(&mut self, collection: Collection, records: Vec<Record>) {
        *self.records_mut(collection) = records;
    }

    /// Tombstones of the given collection; empty for collections that do not
    /// track deletions.
    #[must_use]
    pub fn tombstones(&self, collection: Collection) -> &[Tombstone] {
        match collection {
            Collection::Tasks => &self.deleted_tasks,
            Collection::Notes => &self.deleted_notes,
            Collection::Lists => &self.deleted_lists,
            _ => &[],
        }
    }

    /// Replace the tombstones of the given collection. Ignored for
    /// collections that do not track deletions.
    pub fn set_tombstones(&mut self, collection: Collection, tombstones: Vec<Tombstone>) {
        match collection {
            Collection::Tasks => self.deleted_tasks = tombstones,
            Collection::Notes => self.deleted_notes = tombstones,
            Collection::Lists => self.deleted_lists = tombstones,
            _ => {}
        }
    }

    /// Canonical deep equality: collections and tombstone arrays compare as
    /// id-sorted sets, so array order and field order never produce false
    /// "changes".
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        Collection::ALL.into_iter().all(|collection| {
            sorted_records(self.records(collection)) == sorted_records(other.records(collection))
        }) && Collection::DELETABLE.into_iter().all(|collection| {
            sorted_tombstones(self.tombstones(collection))
                == sorted_tombstones(other.tombstones(collection))
        })
    }
}

fn sorted_records(records: &[Record]) -> Vec<&Record> {
    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    sorted
}

fn sorted_tombstones(tombstones: &[Tombstone]) -> Vec<&Tombstone> {
    let mut sorted: Vec<&Tombstone> = tombstones.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    sorted
}

/// The full exchange unit for one sync cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    /// Payload format version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Time the uploading device assembled the payload (Unix ms)
    #[serde(default)]
    pub timestamp: i64,
    /// Identifier of the uploading device (diagnostics only)
    #[serde(default)]
    pub device_id: String,
    /// All collections and tombstone arrays
    #[serde(default)]
    pub data: SnapshotData,
}

const fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl SyncSnapshot {
    /// Assemble a snapshot for upload.
    #[must_use]
    pub fn new(device_id: impl Into<String>, timestamp: i64, data: SnapshotData) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            timestamp,
            device_id: device_id.into(),
            data,
        }
    }
}
