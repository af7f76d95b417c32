//! Storage context consumed by the sync engine
//!
//! The engine only needs typed get/put/delete by identifier, a remote-id
//! lookup, the set of records awaiting push, merge-base snapshots, and a
//! small key/value area for sync state. Two implementations ship here: an
//! in-memory store for tests and embedding, and a `SQLite` adapter.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::model::{Entity, LocalId, RemoteId};

/// Key under which the last successful pull timestamp is persisted
pub const STATE_LAST_SYNCED_AT: &str = "last_synced_at";
/// Key under which clock correction samples are persisted
pub const STATE_CLOCK_SAMPLES: &str = "clock_samples";

/// Typed record storage
pub trait Store: Send + Sync + 'static {
    /// Fetch a record by local identifier
    fn get<T: Entity>(&self, id: LocalId) -> Result<Option<T>>;

    /// Insert or replace a record
    fn put<T: Entity>(&self, record: &T) -> Result<()>;

    /// Physically remove a record. Removing a missing record is a no-op.
    fn delete<T: Entity>(&self, id: LocalId) -> Result<()>;

    /// Fetch a record by its server-assigned identifier
    fn find_by_remote<T: Entity>(&self, remote_id: RemoteId) -> Result<Option<T>>;

    /// All records of one type that the next push cycle must consider:
    /// dirty, never-synced, or tombstoned
    fn unsynced<T: Entity>(&self) -> Result<Vec<T>>;

    /// All records of one type, placeholders included
    fn all<T: Entity>(&self) -> Result<Vec<T>>;

    /// Merge-base snapshot of a record as last synchronized
    fn base_of<T: Entity>(&self, id: LocalId) -> Result<Option<T>>;

    /// Capture a merge-base snapshot, superseding any previous one
    fn put_base<T: Entity>(&self, record: &T) -> Result<()>;

    /// Discard the merge-base snapshot for a record
    fn clear_base<T: Entity>(&self, id: LocalId) -> Result<()>;

    /// Read a sync-state value
    fn load_state(&self, key: &str) -> Result<Option<String>>;

    /// Write a sync-state value
    fn save_state(&self, key: &str, value: &str) -> Result<()>;

    /// Run `f` atomically: either every write inside lands, or none do
    fn in_transaction<R>(&self, f: impl FnOnce(&Self) -> Result<R>) -> Result<R>
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::Error;
    use crate::model::{Entity, Workspace};

    fn contract_roundtrip<S: Store>(store: &S) {
        let ws = Workspace::new("Personal");
        store.put(&ws).unwrap();

        let fetched: Workspace = store.get(ws.local_id()).unwrap().unwrap();
        assert_eq!(fetched, ws);

        store.delete::<Workspace>(ws.local_id()).unwrap();
        assert!(store.get::<Workspace>(ws.local_id()).unwrap().is_none());
        // Deleting again is a no-op
        store.delete::<Workspace>(ws.local_id()).unwrap();
    }

    fn contract_remote_lookup<S: Store>(store: &S) {
        let mut ws = Workspace::new("Personal");
        ws.meta.remote_id = Some(RemoteId(77));
        store.put(&ws).unwrap();

        let found: Workspace = store.find_by_remote(RemoteId(77)).unwrap().unwrap();
        assert_eq!(found.local_id(), ws.local_id());
        assert!(store.find_by_remote::<Workspace>(RemoteId(78)).unwrap().is_none());
    }

    fn contract_unsynced<S: Store>(store: &S) {
        let dirty = Workspace::new("dirty");
        let mut clean = Workspace::new("clean");
        clean.meta.is_dirty = false;
        clean.meta.remote_id = Some(RemoteId(1));
        let mut tombstoned = Workspace::new("gone");
        tombstoned.meta.is_dirty = false;
        tombstoned.meta.remote_id = Some(RemoteId(2));
        tombstoned.meta.tombstone();

        store.put(&dirty).unwrap();
        store.put(&clean).unwrap();
        store.put(&tombstoned).unwrap();

        let mut pending: Vec<LocalId> = store
            .unsynced::<Workspace>()
            .unwrap()
            .iter()
            .map(Entity::local_id)
            .collect();
        pending.sort();
        let mut expected = vec![dirty.local_id(), tombstoned.local_id()];
        expected.sort();
        assert_eq!(pending, expected);
    }

    fn contract_bases<S: Store>(store: &S) {
        let ws = Workspace::new("Personal");
        assert!(store.base_of::<Workspace>(ws.local_id()).unwrap().is_none());

        store.put_base(&ws).unwrap();
        let base: Workspace = store.base_of(ws.local_id()).unwrap().unwrap();
        assert_eq!(base, ws);

        store.clear_base::<Workspace>(ws.local_id()).unwrap();
        assert!(store.base_of::<Workspace>(ws.local_id()).unwrap().is_none());
    }

    fn contract_state<S: Store>(store: &S) {
        assert!(store.load_state("missing").unwrap().is_none());
        store.save_state("k", "v1").unwrap();
        store.save_state("k", "v2").unwrap();
        assert_eq!(store.load_state("k").unwrap().as_deref(), Some("v2"));
    }

    fn contract_transaction_rollback<S: Store>(store: &S) {
        let ws = Workspace::new("doomed");
        let result: Result<()> = store.in_transaction(|s| {
            s.put(&ws)?;
            Err(Error::Fatal("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.get::<Workspace>(ws.local_id()).unwrap().is_none());

        let kept = Workspace::new("kept");
        store
            .in_transaction(|s| s.put(&kept))
            .unwrap();
        assert!(store.get::<Workspace>(kept.local_id()).unwrap().is_some());
    }

    #[test]
    fn memory_store_contract() {
        contract_roundtrip(&MemoryStore::new());
        contract_remote_lookup(&MemoryStore::new());
        contract_unsynced(&MemoryStore::new());
        contract_bases(&MemoryStore::new());
        contract_state(&MemoryStore::new());
        contract_transaction_rollback(&MemoryStore::new());
    }

    #[test]
    fn sqlite_store_contract() {
        contract_roundtrip(&SqliteStore::open_in_memory().unwrap());
        contract_remote_lookup(&SqliteStore::open_in_memory().unwrap());
        contract_unsynced(&SqliteStore::open_in_memory().unwrap());
        contract_bases(&SqliteStore::open_in_memory().unwrap());
        contract_state(&SqliteStore::open_in_memory().unwrap());
        contract_transaction_rollback(&SqliteStore::open_in_memory().unwrap());
    }
}
