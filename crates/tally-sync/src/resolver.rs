//! Local/remote identity resolution
//!
//! The server and the local store disagree about what a record is called:
//! locally every record has a [`LocalId`] from birth, while the server hands
//! out numeric ids on first push. The resolver maps between the two and
//! creates placeholder records when a relation references a remote id the
//! store has never seen, so foreign keys stay satisfiable while pulls are
//! still in flight.

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Entity, LocalId, RemoteId};
use crate::store::Store;

/// Maps between local and remote record identity over one storage context
pub struct Resolver<'a, S: Store> {
    store: &'a S,
}

impl<'a, S: Store> Resolver<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Local id for a server-assigned id, creating a placeholder when the
    /// record has not arrived yet. Placeholder creation is a pure local
    /// write, so this never fails for a missing record.
    pub fn local_id_for<T: Entity>(&self, remote_id: RemoteId) -> Result<LocalId> {
        if let Some(existing) = self.store.find_by_remote::<T>(remote_id)? {
            return Ok(existing.local_id());
        }
        let placeholder = T::placeholder(remote_id);
        self.store.put(&placeholder)?;
        debug!(kind = %T::KIND, %remote_id, local_id = %placeholder.local_id(),
               "created placeholder for unseen remote record");
        Ok(placeholder.local_id())
    }

    /// Server-assigned id for a local record. Errors with
    /// [`Error::RelationUnresolved`] when the record is missing or has never
    /// been synced: a local-only relation cannot be expressed on the wire.
    pub fn remote_id_for<T: Entity>(&self, local_id: LocalId) -> Result<RemoteId> {
        let unresolved = || Error::RelationUnresolved { kind: T::KIND, local_id };
        let record = self.store.get::<T>(local_id)?.ok_or_else(unresolved)?;
        record.meta().remote_id.ok_or_else(unresolved)
    }

    /// Record for a remote id, with an optional local-id hint for the
    /// "reconcile with the server echo of a record we just created" path.
    /// When both keys match different records, the remote match wins:
    /// remote identity is authoritative once assigned.
    pub fn record_for<T: Entity>(
        &self,
        remote_id: RemoteId,
        hint: Option<LocalId>,
    ) -> Result<Option<T>> {
        if let Some(record) = self.store.find_by_remote::<T>(remote_id)? {
            return Ok(Some(record));
        }
        match hint {
            Some(local_id) => self.store.get(local_id),
            None => Ok(None),
        }
    }
}
