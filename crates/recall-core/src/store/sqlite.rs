//! SQLite store implementation
//!
//! Records are stored as JSON bodies keyed by (collection, id); the schema
//! is deliberately generic so the eight collections share one table.

#![allow(clippy::significant_drop_in_scrutinee)]

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{cap_tombstones, Collection, Record, RecordId, Tombstone};

use super::{MetaStore, RecordStore, TombstoneStore};

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Durable implementation of the local store capabilities.
///
/// Statements are short and run behind a single connection lock; callers on
/// the async side never hold the lock across an await point.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and migrate) a database at the given path, creating it if it
    /// doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // WAL/synchronous pragmas can fail on exotic filesystems; ignore.
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("sqlite connection lock poisoned".to_string()))
    }
}

/// Run all pending migrations
fn migrate(conn: &Connection) -> Result<()> {
    let version = schema_version(conn)?;
    if version < 1 {
        migrate_v1(conn)?;
    }
    Ok(())
}

/// Get the current schema version
fn schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|flag| flag != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Migration to version 1: Initial schema
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS schema_version (
             version INTEGER PRIMARY KEY
         );
         CREATE TABLE IF NOT EXISTS records (
             collection TEXT NOT NULL,
             id TEXT NOT NULL,
             body TEXT NOT NULL,
             PRIMARY KEY (collection, id)
         );
         CREATE TABLE IF NOT EXISTS tombstones (
             collection TEXT NOT NULL,
             id TEXT NOT NULL,
             deleted_at INTEGER NOT NULL,
             PRIMARY KEY (collection, id)
         );
         CREATE TABLE IF NOT EXISTS meta (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );
         INSERT INTO schema_version (version) VALUES (1);
         COMMIT;",
    )?;
    Ok(())
}

fn parse_body(body: &str) -> Result<Record> {
    Ok(serde_json::from_str(body)?)
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get_all(&self, collection: Collection) -> Result<Vec<Record>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT body FROM records WHERE collection = ? ORDER BY id")?;

        let bodies = stmt
            .query_map(params![collection.as_str()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        bodies.iter().map(|body| parse_body(body)).collect()
    }

    async fn get(&self, collection: Collection, id: &RecordId) -> Result<Option<Record>> {
        let conn = self.lock()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM records WHERE collection = ? AND id = ?",
                params![collection.as_str(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        body.as_deref().map(parse_body).transpose()
    }

    async fn add(&self, collection: Collection, record: Record) -> Result<RecordId> {
        let conn = self.lock()?;
        let body = serde_json::to_string(&record)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO records (collection, id, body) VALUES (?, ?, ?)",
            params![collection.as_str(), record.id.as_str(), body],
        )?;

        if inserted == 0 {
            return Err(Error::InvalidInput(format!(
                "duplicate id {} in {collection}",
                record.id
            )));
        }
        Ok(record.id)
    }

    async fn update(&self, collection: Collection, record: Record) -> Result<()> {
        let conn = self.lock()?;
        let body = serde_json::to_string(&record)?;
        conn.execute(
            "INSERT OR REPLACE INTO records (collection, id, body) VALUES (?, ?, ?)",
            params![collection.as_str(), record.id.as_str(), body],
        )?;
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &RecordId) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM records WHERE collection = ? AND id = ?",
            params![collection.as_str(), id.as_str()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl TombstoneStore for SqliteStore {
    async fn get_tombstones(&self, collection: Collection) -> Result<Vec<Tombstone>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, deleted_at FROM tombstones
             WHERE collection = ?
             ORDER BY deleted_at, id",
        )?;

        let tombstones = stmt
            .query_map(params![collection.as_str()], |row| {
                Ok(Tombstone {
                    id: RecordId::from(row.get::<_, String>(0)?),
                    deleted_at: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<Tombstone>>>()?;

        Ok(tombstones)
    }

    async fn set_tombstones(
        &self,
        collection: Collection,
        tombstones: Vec<Tombstone>,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM tombstones WHERE collection = ?",
            params![collection.as_str()],
        )?;
        for tombstone in cap_tombstones(tombstones) {
            tx.execute(
                "INSERT INTO tombstones (collection, id, deleted_at) VALUES (?, ?, ?)",
                params![
                    collection.as_str(),
                    tombstone.id.as_str(),
                    tombstone.deleted_at
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl MetaStore for SqliteStore {
    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM meta WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }
}
