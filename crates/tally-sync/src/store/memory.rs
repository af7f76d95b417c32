//! In-memory storage context

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use super::Store;
use crate::error::{Error, Result};
use crate::model::{Entity, EntityKind, LocalId, RemoteId};

type Table = HashMap<EntityKind, HashMap<LocalId, Value>>;

#[derive(Default)]
struct Inner {
    records: Table,
    bases: Table,
    state: HashMap<String, String>,
}

/// Hash-map backed [`Store`], used by tests and lightweight embeddings.
///
/// Records are kept as JSON values so behavior matches the `SQLite`
/// adapter, including serialization failures.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".into()))
    }

    fn decode<T: Entity>(value: &Value) -> Result<T> {
        serde_json::from_value(value.clone()).map_err(Error::from)
    }
}

impl Store for MemoryStore {
    fn get<T: Entity>(&self, id: LocalId) -> Result<Option<T>> {
        let inner = self.lock()?;
        inner
            .records
            .get(&T::KIND)
            .and_then(|table| table.get(&id))
            .map(Self::decode)
            .transpose()
    }

    fn put<T: Entity>(&self, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)?;
        let mut inner = self.lock()?;
        inner
            .records
            .entry(T::KIND)
            .or_default()
            .insert(record.local_id(), value);
        Ok(())
    }

    fn delete<T: Entity>(&self, id: LocalId) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(table) = inner.records.get_mut(&T::KIND) {
            table.remove(&id);
        }
        Ok(())
    }

    fn find_by_remote<T: Entity>(&self, remote_id: RemoteId) -> Result<Option<T>> {
        let inner = self.lock()?;
        let Some(table) = inner.records.get(&T::KIND) else {
            return Ok(None);
        };
        for value in table.values() {
            let record: T = Self::decode(value)?;
            if record.meta().remote_id == Some(remote_id) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn unsynced<T: Entity>(&self) -> Result<Vec<T>> {
        Ok(self
            .all::<T>()?
            .into_iter()
            .filter(|record| record.meta().needs_push())
            .collect())
    }

    fn all<T: Entity>(&self) -> Result<Vec<T>> {
        let inner = self.lock()?;
        let Some(table) = inner.records.get(&T::KIND) else {
            return Ok(Vec::new());
        };
        table.values().map(Self::decode).collect()
    }

    fn base_of<T: Entity>(&self, id: LocalId) -> Result<Option<T>> {
        let inner = self.lock()?;
        inner
            .bases
            .get(&T::KIND)
            .and_then(|table| table.get(&id))
            .map(Self::decode)
            .transpose()
    }

    fn put_base<T: Entity>(&self, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)?;
        let mut inner = self.lock()?;
        inner
            .bases
            .entry(T::KIND)
            .or_default()
            .insert(record.local_id(), value);
        Ok(())
    }

    fn clear_base<T: Entity>(&self, id: LocalId) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(table) = inner.bases.get_mut(&T::KIND) {
            table.remove(&id);
        }
        Ok(())
    }

    fn load_state(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.state.get(key).cloned())
    }

    fn save_state(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.state.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn in_transaction<R>(&self, f: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        // Snapshot-and-restore keeps the whole closure atomic without
        // holding the lock while `f` runs.
        let snapshot = {
            let inner = self.lock()?;
            (inner.records.clone(), inner.bases.clone(), inner.state.clone())
        };
        match f(self) {
            Ok(value) => Ok(value),
            Err(error) => {
                let mut inner = self.lock()?;
                inner.records = snapshot.0;
                inner.bases = snapshot.1;
                inner.state = snapshot.2;
                Err(error)
            }
        }
    }
}
