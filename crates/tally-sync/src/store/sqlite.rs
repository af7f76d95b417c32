//! `SQLite` storage context

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use super::Store;
use crate::error::{Error, Result};
use crate::model::{Entity, LocalId, RemoteId};

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// `SQLite` implementation of [`Store`].
///
/// Records are stored as JSON bodies with the sync-relevant columns
/// (remote id, needs-push flag) lifted out for indexing. The physical
/// layout is an adapter detail, not a schema contract.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a store at the given path, creating and migrating as needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // journal_mode returns the resulting mode as a row, so it cannot go
        // through execute_batch. Not all modes apply to in-memory databases.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(())).ok();
        conn.execute_batch("PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;")?;
        migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("sqlite connection lock poisoned".into()))
    }

    fn decode<T: Entity>(body: &str) -> Result<T> {
        serde_json::from_str(body).map_err(Error::from)
    }
}

impl Store for SqliteStore {
    fn get<T: Entity>(&self, id: LocalId) -> Result<Option<T>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM records WHERE kind = ?1 AND local_id = ?2",
                params![T::KIND.as_str(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        body.as_deref().map(Self::decode).transpose()
    }

    fn put<T: Entity>(&self, record: &T) -> Result<()> {
        let body = serde_json::to_string(record)?;
        let meta = record.meta();
        self.conn()?.execute(
            "INSERT OR REPLACE INTO records (kind, local_id, remote_id, needs_push, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                T::KIND.as_str(),
                meta.local_id.as_str(),
                meta.remote_id.map(|id| id.0),
                i32::from(meta.needs_push()),
                body
            ],
        )?;
        Ok(())
    }

    fn delete<T: Entity>(&self, id: LocalId) -> Result<()> {
        self.conn()?.execute(
            "DELETE FROM records WHERE kind = ?1 AND local_id = ?2",
            params![T::KIND.as_str(), id.as_str()],
        )?;
        Ok(())
    }

    fn find_by_remote<T: Entity>(&self, remote_id: RemoteId) -> Result<Option<T>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM records WHERE kind = ?1 AND remote_id = ?2",
                params![T::KIND.as_str(), remote_id.0],
                |row| row.get(0),
            )
            .optional()?;
        body.as_deref().map(Self::decode).transpose()
    }

    fn unsynced<T: Entity>(&self) -> Result<Vec<T>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT body FROM records WHERE kind = ?1 AND needs_push = 1")?;
        let bodies = stmt
            .query_map(params![T::KIND.as_str()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        bodies.iter().map(|body| Self::decode(body)).collect()
    }

    fn all<T: Entity>(&self) -> Result<Vec<T>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT body FROM records WHERE kind = ?1")?;
        let bodies = stmt
            .query_map(params![T::KIND.as_str()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        bodies.iter().map(|body| Self::decode(body)).collect()
    }

    fn base_of<T: Entity>(&self, id: LocalId) -> Result<Option<T>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM merge_bases WHERE kind = ?1 AND local_id = ?2",
                params![T::KIND.as_str(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        body.as_deref().map(Self::decode).transpose()
    }

    fn put_base<T: Entity>(&self, record: &T) -> Result<()> {
        let body = serde_json::to_string(record)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO merge_bases (kind, local_id, body) VALUES (?1, ?2, ?3)",
            params![T::KIND.as_str(), record.local_id().as_str(), body],
        )?;
        Ok(())
    }

    fn clear_base<T: Entity>(&self, id: LocalId) -> Result<()> {
        self.conn()?.execute(
            "DELETE FROM merge_bases WHERE kind = ?1 AND local_id = ?2",
            params![T::KIND.as_str(), id.as_str()],
        )?;
        Ok(())
    }

    fn load_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn save_state(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn in_transaction<R>(&self, f: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        self.conn()?.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(value) => {
                self.conn()?.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(error) => {
                if let Ok(conn) = self.conn() {
                    let _ = conn.execute_batch("ROLLBACK");
                }
                Err(error)
            }
        }
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

fn schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(0);
    }
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?)
}

/// Migration to version 1: initial schema
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS schema_version (
             version INTEGER PRIMARY KEY
         );
         CREATE TABLE IF NOT EXISTS records (
             kind TEXT NOT NULL,
             local_id TEXT NOT NULL,
             remote_id INTEGER,
             needs_push INTEGER NOT NULL DEFAULT 0,
             body TEXT NOT NULL,
             PRIMARY KEY (kind, local_id)
         );
         CREATE INDEX IF NOT EXISTS idx_records_remote ON records(kind, remote_id);
         CREATE INDEX IF NOT EXISTS idx_records_needs_push ON records(kind, needs_push);
         CREATE TABLE IF NOT EXISTS merge_bases (
             kind TEXT NOT NULL,
             local_id TEXT NOT NULL,
             body TEXT NOT NULL,
             PRIMARY KEY (kind, local_id)
         );
         CREATE TABLE IF NOT EXISTS sync_state (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );
         COMMIT;",
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
        params![CURRENT_VERSION],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Workspace;

    #[test]
    fn migrations_are_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.conn().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn needs_push_column_tracks_meta() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut ws = Workspace::new("Personal");
        store.put(&ws).unwrap();
        assert_eq!(store.unsynced::<Workspace>().unwrap().len(), 1);

        ws.meta.is_dirty = false;
        ws.meta.remote_id = Some(RemoteId(9));
        store.put(&ws).unwrap();
        assert!(store.unsynced::<Workspace>().unwrap().is_empty());
    }
}
