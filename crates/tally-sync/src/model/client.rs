//! Client (customer) model

use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, LocalId, Relation, RemoteId, SyncMeta};

/// A customer projects are billed against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub meta: SyncMeta,
    pub name: String,
    pub workspace: LocalId,
}

impl Client {
    #[must_use]
    pub fn new(name: impl Into<String>, workspace: LocalId) -> Self {
        Self {
            meta: SyncMeta::new_local(),
            name: name.into(),
            workspace,
        }
    }
}

impl Entity for Client {
    const KIND: EntityKind = EntityKind::Client;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn relations(&self) -> Vec<Relation> {
        vec![Relation::new(EntityKind::Workspace, self.workspace)]
    }

    fn placeholder(remote_id: RemoteId) -> Self {
        Self {
            meta: SyncMeta::placeholder(remote_id),
            name: String::new(),
            // Placeholders get a dangling workspace reference; the real
            // record overwrites it when it arrives.
            workspace: LocalId::new(),
        }
    }
}
