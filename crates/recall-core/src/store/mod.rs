//! Local persistence capabilities consumed by the sync engine.
//!
//! The engine is constructed against these traits rather than a concrete
//! database so tests can inject fakes. Each operation succeeds or fails per
//! record; no transaction spans multiple records or collections.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Collection, Record, RecordId, Tombstone};

/// Record storage per named collection.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All records of a collection; empty when the collection has none.
    async fn get_all(&self, collection: Collection) -> Result<Vec<Record>>;

    /// A single record by id.
    async fn get(&self, collection: Collection, id: &RecordId) -> Result<Option<Record>>;

    /// Insert a new record and return its id. Fails on a duplicate id.
    async fn add(&self, collection: Collection, record: Record) -> Result<RecordId>;

    /// Upsert a record by id.
    async fn update(&self, collection: Collection, record: Record) -> Result<()>;

    /// Remove a record. Removing an absent id is a no-op.
    async fn delete(&self, collection: Collection, id: &RecordId) -> Result<()>;
}

/// Deletion tombstone storage for the collections that track deletions.
#[async_trait]
pub trait TombstoneStore: Send + Sync {
    /// Tombstones recorded for a collection.
    async fn get_tombstones(&self, collection: Collection) -> Result<Vec<Tombstone>>;

    /// Replace the tombstone array. Implementations cap to the retention
    /// limit on write, dropping the oldest entries.
    async fn set_tombstones(&self, collection: Collection, tombstones: Vec<Tombstone>)
        -> Result<()>;

    /// Record a deletion observed by application code. The stored
    /// `deleted_at` never decreases for a given id.
    async fn record_deletion(
        &self,
        collection: Collection,
        id: &RecordId,
        deleted_at: i64,
    ) -> Result<()> {
        let mut tombstones = self.get_tombstones(collection).await?;
        if let Some(existing) = tombstones.iter_mut().find(|tombstone| &tombstone.id == id) {
            existing.deleted_at = existing.deleted_at.max(deleted_at);
        } else {
            tombstones.push(Tombstone::new(id.clone(), deleted_at));
        }
        self.set_tombstones(collection, tombstones).await
    }
}

/// Small key/value persistence for sync configuration and device identity.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get_meta(&self, key: &str) -> Result<Option<String>>;
    async fn set_meta(&self, key: &str, value: &str) -> Result<()>;
}

/// The full local capability the sync engine is constructed with.
pub trait LocalStore: RecordStore + TombstoneStore + MetaStore {}

impl<T: RecordStore + TombstoneStore + MetaStore> LocalStore for T {}
