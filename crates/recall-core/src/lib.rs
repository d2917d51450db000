//! recall-core - Core library for Recall
//!
//! This crate contains the shared data models, the local record store, and
//! the multi-device sync engine used by all Recall interfaces.

pub mod error;
pub mod models;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Collection, Record, RecordId, SnapshotData, SyncSnapshot, Tombstone};
pub use store::{LocalStore, MemoryStore, MetaStore, RecordStore, SqliteStore, TombstoneStore};
pub use sync::{RemoteProvider, SyncConfig, SyncDirection, SyncEngine, SyncEvent, SyncOutcome};
