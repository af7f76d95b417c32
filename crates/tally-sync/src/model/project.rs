//! Project model

use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, LocalId, Relation, RemoteId, SyncMeta};

/// A project time entries are tracked against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub meta: SyncMeta,
    pub name: String,
    /// Hex color used by the clients, e.g. `#06aaf5`
    pub color: String,
    pub active: bool,
    pub billable: bool,
    pub workspace: LocalId,
    pub client: Option<LocalId>,
}

impl Project {
    #[must_use]
    pub fn new(name: impl Into<String>, workspace: LocalId) -> Self {
        Self {
            meta: SyncMeta::new_local(),
            name: name.into(),
            color: String::from("#06aaf5"),
            active: true,
            billable: false,
            workspace,
            client: None,
        }
    }

    /// Attach this project to a client
    #[must_use]
    pub fn with_client(mut self, client: LocalId) -> Self {
        self.client = Some(client);
        self
    }
}

impl Entity for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn relations(&self) -> Vec<Relation> {
        let mut relations = vec![Relation::new(EntityKind::Workspace, self.workspace)];
        if let Some(client) = self.client {
            relations.push(Relation::new(EntityKind::Client, client));
        }
        relations
    }

    fn placeholder(remote_id: RemoteId) -> Self {
        Self {
            meta: SyncMeta::placeholder(remote_id),
            name: String::new(),
            color: String::new(),
            active: false,
            billable: false,
            workspace: LocalId::new(),
            client: None,
        }
    }
}
