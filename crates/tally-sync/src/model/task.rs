//! Task model

use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, LocalId, Relation, RemoteId, SyncMeta};

/// A task nested under a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub meta: SyncMeta,
    pub name: String,
    pub active: bool,
    pub workspace: LocalId,
    pub project: LocalId,
}

impl Task {
    #[must_use]
    pub fn new(name: impl Into<String>, workspace: LocalId, project: LocalId) -> Self {
        Self {
            meta: SyncMeta::new_local(),
            name: name.into(),
            active: true,
            workspace,
            project,
        }
    }
}

impl Entity for Task {
    const KIND: EntityKind = EntityKind::Task;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn relations(&self) -> Vec<Relation> {
        vec![
            Relation::new(EntityKind::Workspace, self.workspace),
            Relation::new(EntityKind::Project, self.project),
        ]
    }

    fn placeholder(remote_id: RemoteId) -> Self {
        Self {
            meta: SyncMeta::placeholder(remote_id),
            name: String::new(),
            active: false,
            workspace: LocalId::new(),
            project: LocalId::new(),
        }
    }
}
