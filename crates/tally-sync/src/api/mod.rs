//! Network client contract
//!
//! The sync engine is transport-agnostic: it only needs typed CRUD plus a
//! "changes since" call, expressed over wire records that carry remote ids
//! for relations. A real HTTP client lives outside this crate; the
//! [`MockApi`] double ships here for tests and embedding.

pub mod mock;

pub use mock::MockApi;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Error;
use crate::model::EntityKind;

/// Errors surfaced by an [`ApiClient`] implementation
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level failure; the affected records stay dirty and retry
    /// on the next run
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server understood and refused the record
    #[error("record rejected: {0}")]
    Rejected(String),
}

impl From<ApiError> for Error {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Transport(message) => Self::Transport(message),
            ApiError::Rejected(message) => Self::Rejected(message),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Typed CRUD plus incremental change feed
#[async_trait]
pub trait ApiClient: Send + Sync + 'static {
    /// Create a record server-side; the echo carries the assigned id
    async fn create(&self, record: WireRecord) -> ApiResult<WireRecord>;

    /// Update an existing record; the echo carries the server timestamp
    async fn update(&self, record: WireRecord) -> ApiResult<WireRecord>;

    /// Delete an existing record
    async fn delete(&self, record: WireRecord) -> ApiResult<()>;

    /// All records changed since `since` (everything when `None`), plus
    /// the server time to use as the next high-water mark
    async fn changes_since(&self, since: Option<DateTime<Utc>>) -> ApiResult<ChangesBatch>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireWorkspace {
    pub id: Option<i64>,
    pub name: String,
    pub admin: bool,
    pub at: DateTime<Utc>,
    pub server_deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireUser {
    pub id: Option<i64>,
    pub fullname: String,
    pub email: String,
    pub default_workspace_id: Option<i64>,
    pub at: DateTime<Utc>,
    pub server_deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireClient {
    pub id: Option<i64>,
    pub name: String,
    pub workspace_id: i64,
    pub at: DateTime<Utc>,
    pub server_deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireProject {
    pub id: Option<i64>,
    pub name: String,
    pub color: String,
    pub active: bool,
    pub billable: bool,
    pub workspace_id: i64,
    pub client_id: Option<i64>,
    pub at: DateTime<Utc>,
    pub server_deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTask {
    pub id: Option<i64>,
    pub name: String,
    pub active: bool,
    pub workspace_id: i64,
    pub project_id: i64,
    pub at: DateTime<Utc>,
    pub server_deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTimeEntry {
    pub id: Option<i64>,
    pub description: String,
    pub start: DateTime<Utc>,
    pub duration_secs: Option<i64>,
    pub billable: bool,
    pub workspace_id: i64,
    pub user_id: i64,
    pub project_id: Option<i64>,
    pub task_id: Option<i64>,
    pub at: DateTime<Utc>,
    pub server_deleted_at: Option<DateTime<Utc>>,
}

/// One wire record of any entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireRecord {
    Workspace(WireWorkspace),
    User(WireUser),
    Client(WireClient),
    Project(WireProject),
    Task(WireTask),
    TimeEntry(WireTimeEntry),
}

impl WireRecord {
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Workspace(_) => EntityKind::Workspace,
            Self::User(_) => EntityKind::User,
            Self::Client(_) => EntityKind::Client,
            Self::Project(_) => EntityKind::Project,
            Self::Task(_) => EntityKind::Task,
            Self::TimeEntry(_) => EntityKind::TimeEntry,
        }
    }

    #[must_use]
    pub const fn remote_id(&self) -> Option<i64> {
        match self {
            Self::Workspace(w) => w.id,
            Self::User(u) => u.id,
            Self::Client(c) => c.id,
            Self::Project(p) => p.id,
            Self::Task(t) => t.id,
            Self::TimeEntry(e) => e.id,
        }
    }

    /// Server timestamp of the record, authoritative for ordering
    #[must_use]
    pub const fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Workspace(w) => w.at,
            Self::User(u) => u.at,
            Self::Client(c) => c.at,
            Self::Project(p) => p.at,
            Self::Task(t) => t.at,
            Self::TimeEntry(e) => e.at,
        }
    }
}

/// Everything that changed server-side since a given timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesBatch {
    /// Server time of the response; persisted as the next since-marker
    /// only after the whole batch commits locally
    pub server_time: DateTime<Utc>,
    pub workspaces: Vec<WireWorkspace>,
    pub users: Vec<WireUser>,
    pub clients: Vec<WireClient>,
    pub projects: Vec<WireProject>,
    pub tasks: Vec<WireTask>,
    pub time_entries: Vec<WireTimeEntry>,
}

impl ChangesBatch {
    /// An empty batch stamped with the given server time
    #[must_use]
    pub const fn at(server_time: DateTime<Utc>) -> Self {
        Self {
            server_time,
            workspaces: Vec::new(),
            users: Vec::new(),
            clients: Vec::new(),
            projects: Vec::new(),
            tasks: Vec::new(),
            time_entries: Vec::new(),
        }
    }

    /// Total record count across all entity types
    #[must_use]
    pub fn len(&self) -> usize {
        self.workspaces.len()
            + self.users.len()
            + self.clients.len()
            + self.projects.len()
            + self.tasks.len()
            + self.time_entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
