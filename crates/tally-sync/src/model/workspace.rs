//! Workspace model

use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, Relation, RemoteId, SyncMeta};

/// A workspace grouping clients, projects, and time entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub meta: SyncMeta,
    pub name: String,
    /// Whether the current user administers this workspace
    pub admin: bool,
}

impl Workspace {
    /// Create a new local workspace, marked dirty for the next push
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: SyncMeta::new_local(),
            name: name.into(),
            admin: true,
        }
    }
}

impl Entity for Workspace {
    const KIND: EntityKind = EntityKind::Workspace;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn relations(&self) -> Vec<Relation> {
        Vec::new()
    }

    fn placeholder(remote_id: RemoteId) -> Self {
        Self {
            meta: SyncMeta::placeholder(remote_id),
            name: String::new(),
            admin: false,
        }
    }
}
