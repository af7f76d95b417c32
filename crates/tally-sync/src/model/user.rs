//! User model

use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, LocalId, Relation, RemoteId, SyncMeta};

/// The account owning the local data set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub meta: SyncMeta,
    pub fullname: String,
    pub email: String,
    /// Workspace new time entries default into
    pub default_workspace: Option<LocalId>,
}

impl User {
    #[must_use]
    pub fn new(fullname: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            meta: SyncMeta::new_local(),
            fullname: fullname.into(),
            email: email.into(),
            default_workspace: None,
        }
    }
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn relations(&self) -> Vec<Relation> {
        // default_workspace is a preference, not a push-ordering dependency
        Vec::new()
    }

    fn placeholder(remote_id: RemoteId) -> Self {
        Self {
            meta: SyncMeta::placeholder(remote_id),
            fullname: String::new(),
            email: String::new(),
            default_workspace: None,
        }
    }
}
