//! Data models for Recall

mod collection;
mod record;
mod snapshot;
mod tombstone;

pub use collection::Collection;
pub use record::{Record, RecordId};
pub use snapshot::{SnapshotData, SyncSnapshot, SNAPSHOT_VERSION};
pub use tombstone::{cap_tombstones, Tombstone, TOMBSTONE_RETENTION};
