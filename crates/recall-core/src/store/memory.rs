//! In-memory store implementation
//!
//! Used by tests and as a lightweight substrate when persistence is handled
//! elsewhere.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{cap_tombstones, Collection, Record, RecordId, Tombstone};

use super::{MetaStore, RecordStore, TombstoneStore};

/// Volatile implementation of the local store capabilities.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Collection, BTreeMap<RecordId, Record>>>,
    tombstones: RwLock<HashMap<Collection, Vec<Tombstone>>>,
    meta: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> Error {
    Error::Database("memory store lock poisoned".to_string())
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_all(&self, collection: Collection) -> Result<Vec<Record>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .get(&collection)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, collection: Collection, id: &RecordId) -> Result<Option<Record>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .get(&collection)
            .and_then(|entries| entries.get(id))
            .cloned())
    }

    async fn add(&self, collection: Collection, record: Record) -> Result<RecordId> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let entries = records.entry(collection).or_default();
        if entries.contains_key(&record.id) {
            return Err(Error::InvalidInput(format!(
                "duplicate id {} in {collection}",
                record.id
            )));
        }
        let id = record.id.clone();
        entries.insert(id.clone(), record);
        Ok(id)
    }

    async fn update(&self, collection: Collection, record: Record) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records
            .entry(collection)
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &RecordId) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        if let Some(entries) = records.get_mut(&collection) {
            entries.remove(id);
        }
        Ok(())
    }
}

#[async_trait]
impl TombstoneStore for MemoryStore {
    async fn get_tombstones(&self, collection: Collection) -> Result<Vec<Tombstone>> {
        let tombstones = self.tombstones.read().map_err(|_| poisoned())?;
        Ok(tombstones.get(&collection).cloned().unwrap_or_default())
    }

    async fn set_tombstones(
        &self,
        collection: Collection,
        tombstones: Vec<Tombstone>,
    ) -> Result<()> {
        let mut stored = self.tombstones.write().map_err(|_| poisoned())?;
        stored.insert(collection, cap_tombstones(tombstones));
        Ok(())
    }
}

#[async_trait]
impl MetaStore for MemoryStore {
    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let meta = self.meta.read().map_err(|_| poisoned())?;
        Ok(meta.get(key).cloned())
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let mut meta = self.meta.write().map_err(|_| poisoned())?;
        meta.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::TOMBSTONE_RETENTION;

    #[tokio::test(flavor = "multi_thread")]
    async fn add_get_update_delete_round_trip() {
        let store = MemoryStore::new();
        let record = Record::new("t1").with("description", "Buy milk");

        let id = store.add(Collection::Tasks, record.clone()).await.unwrap();
        assert_eq!(id, RecordId::from("t1"));
        assert_eq!(
            store.get(Collection::Tasks, &id).await.unwrap(),
            Some(record.clone())
        );

        let updated = record.with("description", "Buy oat milk");
        store
            .update(Collection::Tasks, updated.clone())
            .await
            .unwrap();
        assert_eq!(
            store.get(Collection::Tasks, &id).await.unwrap(),
            Some(updated)
        );

        store.delete(Collection::Tasks, &id).await.unwrap();
        assert_eq!(store.get(Collection::Tasks, &id).await.unwrap(), None);
        assert!(store.get_all(Collection::Tasks).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_rejects_duplicate_ids() {
        let store = MemoryStore::new();
        store
            .add(Collection::Notes, Record::new("n1"))
            .await
            .unwrap();

        let error = store.add(Collection::Notes, Record::new("n1")).await;
        assert!(matches!(error, Err(Error::InvalidInput(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_of_absent_id_is_a_noop() {
        let store = MemoryStore::new();
        store
            .delete(Collection::Lists, &RecordId::from("missing"))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn collections_are_namespaced() {
        let store = MemoryStore::new();
        store
            .add(Collection::Tasks, Record::new("same-id"))
            .await
            .unwrap();
        store
            .add(Collection::Notes, Record::new("same-id"))
            .await
            .unwrap();

        assert_eq!(store.get_all(Collection::Tasks).await.unwrap().len(), 1);
        assert_eq!(store.get_all(Collection::Notes).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn record_deletion_keeps_deleted_at_monotone() {
        let store = MemoryStore::new();
        let id = RecordId::from("t1");

        store
            .record_deletion(Collection::Tasks, &id, 500)
            .await
            .unwrap();
        store
            .record_deletion(Collection::Tasks, &id, 300)
            .await
            .unwrap();

        let tombstones = store.get_tombstones(Collection::Tasks).await.unwrap();
        assert_eq!(tombstones, vec![Tombstone::new("t1", 500)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_tombstones_caps_to_retention_limit() {
        let store = MemoryStore::new();
        let tombstones: Vec<Tombstone> = (0..300)
            .map(|n| Tombstone::new(format!("id-{n}"), i64::from(n)))
            .collect();

        store
            .set_tombstones(Collection::Notes, tombstones)
            .await
            .unwrap();

        let stored = store.get_tombstones(Collection::Notes).await.unwrap();
        assert_eq!(stored.len(), TOMBSTONE_RETENTION);
        assert_eq!(stored.last().unwrap().deleted_at, 299);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn meta_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get_meta("device_id").await.unwrap(), None);

        store.set_meta("device_id", "device_1_ab").await.unwrap();
        assert_eq!(
            store.get_meta("device_id").await.unwrap(),
            Some("device_1_ab".to_string())
        );
    }
}
