//! Synchronizable record model
//!
//! Every entity that syncs carries a [`SyncMeta`] block: the local/remote
//! identity pair plus the dirty/tombstone bookkeeping the sync engine runs on.

mod client;
mod project;
mod task;
mod time_entry;
mod user;
mod workspace;

pub use client::Client;
pub use project::Project;
pub use task::Task;
pub use time_entry::TimeEntry;
pub use user::User;
pub use workspace::Workspace;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Process-local record identifier, using UUID v7 (time-sortable).
/// Immutable once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(Uuid);

impl LocalId {
    /// Create a new unique local ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Server-assigned record identifier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RemoteId(pub i64);

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tag identifying one synchronizable entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Workspace,
    User,
    Client,
    Project,
    Task,
    TimeEntry,
}

impl EntityKind {
    /// All kinds, parents before children. Pull ingestion and push
    /// collection iterate in this order.
    pub const ALL: [Self; 6] = [
        Self::Workspace,
        Self::User,
        Self::Client,
        Self::Project,
        Self::Task,
        Self::TimeEntry,
    ];

    /// Stable name, used as the storage discriminator
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::User => "user",
            Self::Client => "client",
            Self::Project => "project",
            Self::Task => "task",
            Self::TimeEntry => "time_entry",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A foreign-key reference from one record to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relation {
    pub kind: EntityKind,
    pub local_id: LocalId,
}

impl Relation {
    #[must_use]
    pub const fn new(kind: EntityKind, local_id: LocalId) -> Self {
        Self { kind, local_id }
    }
}

/// Sentinel `modified_at` for placeholder records, far enough in the past
/// that any real edit supersedes it.
#[must_use]
pub fn placeholder_timestamp() -> DateTime<Utc> {
    DateTime::<Utc>::MIN_UTC
}

/// Sync bookkeeping shared by all synchronizable entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Process-local identity, immutable once assigned
    pub local_id: LocalId,
    /// Server identity; `None` means the record has never been synced
    pub remote_id: Option<RemoteId>,
    /// UTC timestamp authoritative for conflict ordering
    pub modified_at: DateTime<Utc>,
    /// Local changes not yet acknowledged by the server
    pub is_dirty: bool,
    /// The server refused the last push attempt
    pub remote_rejected: bool,
    /// Tombstone marker; physical removal happens once the deletion is
    /// acknowledged remotely (or immediately if never synced)
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SyncMeta {
    /// Metadata for a record created locally and not yet pushed
    #[must_use]
    pub fn new_local() -> Self {
        Self {
            local_id: LocalId::new(),
            remote_id: None,
            modified_at: Utc::now(),
            is_dirty: true,
            remote_rejected: false,
            deleted_at: None,
        }
    }

    /// Metadata for a placeholder standing in for a record known only by
    /// its remote identity
    #[must_use]
    pub fn placeholder(remote_id: RemoteId) -> Self {
        Self {
            local_id: LocalId::new(),
            remote_id: Some(remote_id),
            modified_at: placeholder_timestamp(),
            is_dirty: false,
            remote_rejected: false,
            deleted_at: None,
        }
    }

    /// True when the record has never been acknowledged by the server
    #[must_use]
    pub const fn never_synced(&self) -> bool {
        self.remote_id.is_none()
    }

    /// True when the record carries a soft-delete marker
    #[must_use]
    pub const fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// True when the record must be considered by the next push cycle
    #[must_use]
    pub const fn needs_push(&self) -> bool {
        self.is_dirty || self.never_synced() || self.is_tombstoned()
    }

    /// Record a local edit: bump the modification timestamp and mark dirty
    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
        self.is_dirty = true;
    }

    /// Mark the record as soft-deleted
    pub fn tombstone(&mut self) {
        self.deleted_at = Some(Utc::now());
        self.is_dirty = true;
    }
}

/// A synchronizable entity
pub trait Entity:
    Clone + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Entity-type tag used for storage and codec dispatch
    const KIND: EntityKind;

    fn meta(&self) -> &SyncMeta;
    fn meta_mut(&mut self) -> &mut SyncMeta;

    /// Foreign keys this record depends on. Used to build the push
    /// dependency graph and to export relations over the wire.
    fn relations(&self) -> Vec<Relation>;

    /// Minimal stand-in satisfying a foreign-key reference before the full
    /// record arrives from the server
    fn placeholder(remote_id: RemoteId) -> Self;

    fn local_id(&self) -> LocalId {
        self.meta().local_id
    }
}
