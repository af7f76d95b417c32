//! Wire/local record translation
//!
//! Records store relations as local ids but travel with remote ids, so
//! every translation goes through the [`Resolver`]. Incoming records run
//! through the three-way [`merge`](crate::merge) against the stored merge
//! base; outgoing records fail with `RelationUnresolved` when a relation
//! has never been synced. Dispatch across entity types is a plain match on
//! [`EntityKind`].

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::api::{
    ChangesBatch, WireClient, WireProject, WireRecord, WireTask, WireTimeEntry, WireUser,
    WireWorkspace,
};
use crate::error::{Error, Result};
use crate::merge::ThreeWayMerge;
use crate::model::{
    Client, Entity, EntityKind, LocalId, Project, Relation, RemoteId, SyncMeta, Task, TimeEntry,
    User, Workspace,
};
use crate::resolver::Resolver;
use crate::store::Store;

/// What the push cycle should do with one record
#[derive(Debug, Clone, PartialEq)]
pub enum PushOp {
    /// Never synced: create remotely, then write back the assigned id
    Create(WireRecord),
    /// Known remotely: update in place
    Update(WireRecord),
    /// Tombstoned and known remotely: delete remotely, then purge locally
    Delete(WireRecord),
    /// Tombstoned but never synced: purge locally, no network call
    DiscardLocal,
}

/// A record awaiting push, with the foreign keys the graph builds edges from
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecord {
    pub kind: EntityKind,
    pub local_id: LocalId,
    pub relations: Vec<Relation>,
}

/// Counters for one applied pull batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub applied: usize,
    pub conflicts: usize,
}

/// Apply a whole pull batch, parents before children so most relations
/// resolve without placeholders. Runs inside the caller's transaction.
pub fn ingest_batch<S: Store>(store: &S, batch: &ChangesBatch) -> Result<PullSummary> {
    let mut summary = PullSummary::default();
    for wire in &batch.workspaces {
        ingest::<S, Workspace, _>(store, wire.id, wire.server_deleted_at, None, wire, decode_workspace, &mut summary)?;
    }
    for wire in &batch.users {
        ingest::<S, User, _>(store, wire.id, wire.server_deleted_at, None, wire, decode_user, &mut summary)?;
    }
    for wire in &batch.clients {
        ingest::<S, Client, _>(store, wire.id, wire.server_deleted_at, None, wire, decode_client, &mut summary)?;
    }
    for wire in &batch.projects {
        ingest::<S, Project, _>(store, wire.id, wire.server_deleted_at, None, wire, decode_project, &mut summary)?;
    }
    for wire in &batch.tasks {
        ingest::<S, Task, _>(store, wire.id, wire.server_deleted_at, None, wire, decode_task, &mut summary)?;
    }
    for wire in &batch.time_entries {
        ingest::<S, TimeEntry, _>(store, wire.id, wire.server_deleted_at, None, wire, decode_time_entry, &mut summary)?;
    }
    Ok(summary)
}

/// All records the next push cycle must consider, across entity types
pub fn collect_pending<S: Store>(store: &S) -> Result<Vec<PendingRecord>> {
    let mut pending = Vec::new();
    collect_kind::<S, Workspace>(store, &mut pending)?;
    collect_kind::<S, User>(store, &mut pending)?;
    collect_kind::<S, Client>(store, &mut pending)?;
    collect_kind::<S, Project>(store, &mut pending)?;
    collect_kind::<S, Task>(store, &mut pending)?;
    collect_kind::<S, TimeEntry>(store, &mut pending)?;
    Ok(pending)
}

/// Build the push operation for one record. Relations are exported here,
/// so a child prepared before its parent was pushed surfaces as
/// `RelationUnresolved`.
pub fn push_payload<S: Store>(store: &S, kind: EntityKind, local_id: LocalId) -> Result<PushOp> {
    match kind {
        EntityKind::Workspace => payload::<S, Workspace>(store, local_id, encode_workspace),
        EntityKind::User => payload::<S, User>(store, local_id, encode_user),
        EntityKind::Client => payload::<S, Client>(store, local_id, encode_client),
        EntityKind::Project => payload::<S, Project>(store, local_id, encode_project),
        EntityKind::Task => payload::<S, Task>(store, local_id, encode_task),
        EntityKind::TimeEntry => payload::<S, TimeEntry>(store, local_id, encode_time_entry),
    }
}

/// Reconcile the server echo of a pushed record back into the store,
/// writing back the server-assigned id and capturing a fresh merge base
pub fn apply_push_echo<S: Store>(store: &S, local_id: LocalId, echo: &WireRecord) -> Result<()> {
    let mut summary = PullSummary::default();
    match echo {
        WireRecord::Workspace(wire) => ingest::<S, Workspace, _>(store, wire.id, wire.server_deleted_at, Some(local_id), wire, decode_workspace, &mut summary),
        WireRecord::User(wire) => ingest::<S, User, _>(store, wire.id, wire.server_deleted_at, Some(local_id), wire, decode_user, &mut summary),
        WireRecord::Client(wire) => ingest::<S, Client, _>(store, wire.id, wire.server_deleted_at, Some(local_id), wire, decode_client, &mut summary),
        WireRecord::Project(wire) => ingest::<S, Project, _>(store, wire.id, wire.server_deleted_at, Some(local_id), wire, decode_project, &mut summary),
        WireRecord::Task(wire) => ingest::<S, Task, _>(store, wire.id, wire.server_deleted_at, Some(local_id), wire, decode_task, &mut summary),
        WireRecord::TimeEntry(wire) => ingest::<S, TimeEntry, _>(store, wire.id, wire.server_deleted_at, Some(local_id), wire, decode_time_entry, &mut summary),
    }
}

/// Physically remove a record and its merge base
pub fn purge_local<S: Store>(store: &S, kind: EntityKind, local_id: LocalId) -> Result<()> {
    fn purge<S: Store, T: Entity>(store: &S, local_id: LocalId) -> Result<()> {
        store.delete::<T>(local_id)?;
        store.clear_base::<T>(local_id)
    }
    match kind {
        EntityKind::Workspace => purge::<S, Workspace>(store, local_id),
        EntityKind::User => purge::<S, User>(store, local_id),
        EntityKind::Client => purge::<S, Client>(store, local_id),
        EntityKind::Project => purge::<S, Project>(store, local_id),
        EntityKind::Task => purge::<S, Task>(store, local_id),
        EntityKind::TimeEntry => purge::<S, TimeEntry>(store, local_id),
    }
}

/// Flag a record the server refused. It stays dirty, so the next run
/// retries it.
pub fn mark_rejected<S: Store>(store: &S, kind: EntityKind, local_id: LocalId) -> Result<()> {
    fn mark<S: Store, T: Entity>(store: &S, local_id: LocalId) -> Result<()> {
        if let Some(mut record) = store.get::<T>(local_id)? {
            record.meta_mut().remote_rejected = true;
            store.put(&record)?;
        }
        Ok(())
    }
    match kind {
        EntityKind::Workspace => mark::<S, Workspace>(store, local_id),
        EntityKind::User => mark::<S, User>(store, local_id),
        EntityKind::Client => mark::<S, Client>(store, local_id),
        EntityKind::Project => mark::<S, Project>(store, local_id),
        EntityKind::Task => mark::<S, Task>(store, local_id),
        EntityKind::TimeEntry => mark::<S, TimeEntry>(store, local_id),
    }
}

// ---------------------------------------------------------------------------
// Generic ingest/payload plumbing
// ---------------------------------------------------------------------------

fn collect_kind<S: Store, T: Entity>(store: &S, out: &mut Vec<PendingRecord>) -> Result<()> {
    for record in store.unsynced::<T>()? {
        out.push(PendingRecord {
            kind: T::KIND,
            local_id: record.local_id(),
            relations: record.relations(),
        });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn ingest<S, T, W>(
    store: &S,
    remote_id: Option<i64>,
    deleted_at: Option<DateTime<Utc>>,
    hint: Option<LocalId>,
    wire: &W,
    decode: impl Fn(&Resolver<'_, S>, &W, LocalId) -> Result<T>,
    summary: &mut PullSummary,
) -> Result<()>
where
    S: Store,
    T: ThreeWayMerge,
{
    let resolver = Resolver::new(store);
    let remote_id = remote_id
        .map(RemoteId)
        .ok_or_else(|| Error::Fatal(format!("incoming {} record without id", T::KIND)))?;
    let local: Option<T> = resolver.record_for(remote_id, hint)?;

    if deleted_at.is_some() {
        if let Some(existing) = local {
            if existing.meta().never_synced() {
                // The server cannot know about a record that was never
                // pushed; a colliding tombstone is someone else's record.
                return Ok(());
            }
            debug!(kind = %T::KIND, local_id = %existing.local_id(), "applying remote tombstone");
            store.delete::<T>(existing.local_id())?;
            store.clear_base::<T>(existing.local_id())?;
            summary.applied += 1;
        }
        return Ok(());
    }

    let local_id = local.as_ref().map_or_else(LocalId::new, Entity::local_id);
    let incoming = decode(&resolver, wire, local_id)?;
    let base = match &local {
        Some(existing) => store.base_of::<T>(existing.local_id())?,
        None => None,
    };
    let merged = T::merge(base.as_ref(), local.as_ref(), &incoming);
    if merged.conflict {
        warn!(kind = %T::KIND, %local_id, "conflicting edits; local values discarded");
        summary.conflicts += 1;
    }
    store.put(&merged.record)?;
    store.put_base(&merged.record)?;
    summary.applied += 1;
    Ok(())
}

fn payload<S, T>(
    store: &S,
    local_id: LocalId,
    encode: impl Fn(&Resolver<'_, S>, &T) -> Result<WireRecord>,
) -> Result<PushOp>
where
    S: Store,
    T: Entity,
{
    let record = store
        .get::<T>(local_id)?
        .ok_or_else(|| Error::Fatal(format!("{} {local_id} vanished during push cycle", T::KIND)))?;
    let resolver = Resolver::new(store);
    let meta = record.meta();
    if meta.is_tombstoned() {
        if meta.never_synced() {
            return Ok(PushOp::DiscardLocal);
        }
        return Ok(PushOp::Delete(encode(&resolver, &record)?));
    }
    let wire = encode(&resolver, &record)?;
    Ok(if meta.never_synced() { PushOp::Create(wire) } else { PushOp::Update(wire) })
}

// ---------------------------------------------------------------------------
// Per-entity encode/decode
// ---------------------------------------------------------------------------

fn wire_meta(
    local_id: LocalId,
    remote_id: RemoteId,
    at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
) -> SyncMeta {
    SyncMeta {
        local_id,
        remote_id: Some(remote_id),
        modified_at: at,
        is_dirty: false,
        remote_rejected: false,
        deleted_at,
    }
}

fn decode_workspace<S: Store>(
    _resolver: &Resolver<'_, S>,
    wire: &WireWorkspace,
    local_id: LocalId,
) -> Result<Workspace> {
    let remote_id = require_id::<Workspace>(wire.id)?;
    Ok(Workspace {
        meta: wire_meta(local_id, remote_id, wire.at, wire.server_deleted_at),
        name: wire.name.clone(),
        admin: wire.admin,
    })
}

fn encode_workspace<S: Store>(
    _resolver: &Resolver<'_, S>,
    record: &Workspace,
) -> Result<WireRecord> {
    Ok(WireRecord::Workspace(WireWorkspace {
        id: record.meta.remote_id.map(|id| id.0),
        name: record.name.clone(),
        admin: record.admin,
        at: record.meta.modified_at,
        server_deleted_at: record.meta.deleted_at,
    }))
}

fn decode_user<S: Store>(
    resolver: &Resolver<'_, S>,
    wire: &WireUser,
    local_id: LocalId,
) -> Result<User> {
    let remote_id = require_id::<User>(wire.id)?;
    Ok(User {
        meta: wire_meta(local_id, remote_id, wire.at, wire.server_deleted_at),
        fullname: wire.fullname.clone(),
        email: wire.email.clone(),
        default_workspace: wire
            .default_workspace_id
            .map(|id| resolver.local_id_for::<Workspace>(RemoteId(id)))
            .transpose()?,
    })
}

fn encode_user<S: Store>(resolver: &Resolver<'_, S>, record: &User) -> Result<WireRecord> {
    Ok(WireRecord::User(WireUser {
        id: record.meta.remote_id.map(|id| id.0),
        fullname: record.fullname.clone(),
        email: record.email.clone(),
        default_workspace_id: record
            .default_workspace
            .map(|id| resolver.remote_id_for::<Workspace>(id))
            .transpose()?
            .map(|id| id.0),
        at: record.meta.modified_at,
        server_deleted_at: record.meta.deleted_at,
    }))
}

fn decode_client<S: Store>(
    resolver: &Resolver<'_, S>,
    wire: &WireClient,
    local_id: LocalId,
) -> Result<Client> {
    let remote_id = require_id::<Client>(wire.id)?;
    Ok(Client {
        meta: wire_meta(local_id, remote_id, wire.at, wire.server_deleted_at),
        name: wire.name.clone(),
        workspace: resolver.local_id_for::<Workspace>(RemoteId(wire.workspace_id))?,
    })
}

fn encode_client<S: Store>(resolver: &Resolver<'_, S>, record: &Client) -> Result<WireRecord> {
    Ok(WireRecord::Client(WireClient {
        id: record.meta.remote_id.map(|id| id.0),
        name: record.name.clone(),
        workspace_id: resolver.remote_id_for::<Workspace>(record.workspace)?.0,
        at: record.meta.modified_at,
        server_deleted_at: record.meta.deleted_at,
    }))
}

fn decode_project<S: Store>(
    resolver: &Resolver<'_, S>,
    wire: &WireProject,
    local_id: LocalId,
) -> Result<Project> {
    let remote_id = require_id::<Project>(wire.id)?;
    Ok(Project {
        meta: wire_meta(local_id, remote_id, wire.at, wire.server_deleted_at),
        name: wire.name.clone(),
        color: wire.color.clone(),
        active: wire.active,
        billable: wire.billable,
        workspace: resolver.local_id_for::<Workspace>(RemoteId(wire.workspace_id))?,
        client: wire
            .client_id
            .map(|id| resolver.local_id_for::<Client>(RemoteId(id)))
            .transpose()?,
    })
}

fn encode_project<S: Store>(resolver: &Resolver<'_, S>, record: &Project) -> Result<WireRecord> {
    Ok(WireRecord::Project(WireProject {
        id: record.meta.remote_id.map(|id| id.0),
        name: record.name.clone(),
        color: record.color.clone(),
        active: record.active,
        billable: record.billable,
        workspace_id: resolver.remote_id_for::<Workspace>(record.workspace)?.0,
        client_id: record
            .client
            .map(|id| resolver.remote_id_for::<Client>(id))
            .transpose()?
            .map(|id| id.0),
        at: record.meta.modified_at,
        server_deleted_at: record.meta.deleted_at,
    }))
}

fn decode_task<S: Store>(
    resolver: &Resolver<'_, S>,
    wire: &WireTask,
    local_id: LocalId,
) -> Result<Task> {
    let remote_id = require_id::<Task>(wire.id)?;
    Ok(Task {
        meta: wire_meta(local_id, remote_id, wire.at, wire.server_deleted_at),
        name: wire.name.clone(),
        active: wire.active,
        workspace: resolver.local_id_for::<Workspace>(RemoteId(wire.workspace_id))?,
        project: resolver.local_id_for::<Project>(RemoteId(wire.project_id))?,
    })
}

fn encode_task<S: Store>(resolver: &Resolver<'_, S>, record: &Task) -> Result<WireRecord> {
    Ok(WireRecord::Task(WireTask {
        id: record.meta.remote_id.map(|id| id.0),
        name: record.name.clone(),
        active: record.active,
        workspace_id: resolver.remote_id_for::<Workspace>(record.workspace)?.0,
        project_id: resolver.remote_id_for::<Project>(record.project)?.0,
        at: record.meta.modified_at,
        server_deleted_at: record.meta.deleted_at,
    }))
}

fn decode_time_entry<S: Store>(
    resolver: &Resolver<'_, S>,
    wire: &WireTimeEntry,
    local_id: LocalId,
) -> Result<TimeEntry> {
    let remote_id = require_id::<TimeEntry>(wire.id)?;
    Ok(TimeEntry {
        meta: wire_meta(local_id, remote_id, wire.at, wire.server_deleted_at),
        description: wire.description.clone(),
        start: wire.start,
        duration_secs: wire.duration_secs,
        billable: wire.billable,
        workspace: resolver.local_id_for::<Workspace>(RemoteId(wire.workspace_id))?,
        user: resolver.local_id_for::<User>(RemoteId(wire.user_id))?,
        project: wire
            .project_id
            .map(|id| resolver.local_id_for::<Project>(RemoteId(id)))
            .transpose()?,
        task: wire
            .task_id
            .map(|id| resolver.local_id_for::<Task>(RemoteId(id)))
            .transpose()?,
    })
}

fn encode_time_entry<S: Store>(
    resolver: &Resolver<'_, S>,
    record: &TimeEntry,
) -> Result<WireRecord> {
    Ok(WireRecord::TimeEntry(WireTimeEntry {
        id: record.meta.remote_id.map(|id| id.0),
        description: record.description.clone(),
        start: record.start,
        duration_secs: record.duration_secs,
        billable: record.billable,
        workspace_id: resolver.remote_id_for::<Workspace>(record.workspace)?.0,
        user_id: resolver.remote_id_for::<User>(record.user)?.0,
        project_id: record
            .project
            .map(|id| resolver.remote_id_for::<Project>(id))
            .transpose()?
            .map(|id| id.0),
        task_id: record
            .task
            .map(|id| resolver.remote_id_for::<Task>(id))
            .transpose()?
            .map(|id| id.0),
        at: record.meta.modified_at,
        server_deleted_at: record.meta.deleted_at,
    }))
}

fn require_id<T: Entity>(id: Option<i64>) -> Result<RemoteId> {
    id.map(RemoteId)
        .ok_or_else(|| Error::Fatal(format!("incoming {} record without id", T::KIND)))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::MemoryStore;

    fn wire_project(id: i64, name: &str, workspace_id: i64) -> WireProject {
        WireProject {
            id: Some(id),
            name: name.into(),
            color: "#06aaf5".into(),
            active: true,
            billable: false,
            workspace_id,
            client_id: None,
            at: Utc::now(),
            server_deleted_at: None,
        }
    }

    #[test]
    fn ingest_creates_record_and_placeholder_parent() {
        let store = MemoryStore::new();
        let mut batch = ChangesBatch::at(Utc::now());
        batch.projects.push(wire_project(10, "Deep work", 1));

        let summary = ingest_batch(&store, &batch).unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.conflicts, 0);

        let project: Project = store.find_by_remote(RemoteId(10)).unwrap().unwrap();
        assert_eq!(project.name, "Deep work");
        assert!(!project.meta.is_dirty);
        // The unseen workspace arrived as a placeholder
        let workspace: Workspace = store.find_by_remote(RemoteId(1)).unwrap().unwrap();
        assert_eq!(workspace.local_id(), project.workspace);
        assert!(!workspace.meta.is_dirty);
        // Merge base captured for the next reconciliation
        assert!(store.base_of::<Project>(project.local_id()).unwrap().is_some());
    }

    #[test]
    fn ingest_tombstone_deletes_synced_record() {
        let store = MemoryStore::new();
        let mut batch = ChangesBatch::at(Utc::now());
        batch.projects.push(wire_project(10, "Deep work", 1));
        ingest_batch(&store, &batch).unwrap();
        let project: Project = store.find_by_remote(RemoteId(10)).unwrap().unwrap();

        let mut tombstone = wire_project(10, "Deep work", 1);
        tombstone.server_deleted_at = Some(Utc::now());
        let mut batch = ChangesBatch::at(Utc::now());
        batch.projects.push(tombstone);
        ingest_batch(&store, &batch).unwrap();

        assert!(store.get::<Project>(project.local_id()).unwrap().is_none());
        assert!(store.base_of::<Project>(project.local_id()).unwrap().is_none());
    }

    #[test]
    fn push_payload_classifies_records() {
        let store = MemoryStore::new();
        let mut workspace = Workspace::new("Personal");
        workspace.meta.is_dirty = false;
        workspace.meta.remote_id = Some(RemoteId(1));
        store.put(&workspace).unwrap();

        let created = Project::new("New", workspace.local_id());
        store.put(&created).unwrap();
        assert!(matches!(
            push_payload(&store, EntityKind::Project, created.local_id()).unwrap(),
            PushOp::Create(_)
        ));

        let mut updated = Project::new("Edited", workspace.local_id());
        updated.meta.remote_id = Some(RemoteId(2));
        store.put(&updated).unwrap();
        assert!(matches!(
            push_payload(&store, EntityKind::Project, updated.local_id()).unwrap(),
            PushOp::Update(_)
        ));

        let mut tombstoned = Project::new("Old", workspace.local_id());
        tombstoned.meta.remote_id = Some(RemoteId(3));
        tombstoned.meta.tombstone();
        store.put(&tombstoned).unwrap();
        assert!(matches!(
            push_payload(&store, EntityKind::Project, tombstoned.local_id()).unwrap(),
            PushOp::Delete(_)
        ));

        let mut local_only = Project::new("Never synced", workspace.local_id());
        local_only.meta.tombstone();
        store.put(&local_only).unwrap();
        assert_eq!(
            push_payload(&store, EntityKind::Project, local_only.local_id()).unwrap(),
            PushOp::DiscardLocal
        );
    }

    #[test]
    fn push_payload_fails_on_unsynced_relation() {
        let store = MemoryStore::new();
        let workspace = Workspace::new("Personal");
        store.put(&workspace).unwrap();
        let project = Project::new("New", workspace.local_id());
        store.put(&project).unwrap();

        let err = push_payload(&store, EntityKind::Project, project.local_id()).unwrap_err();
        assert!(matches!(err, Error::RelationUnresolved { .. }));
    }

    #[test]
    fn echo_write_back_assigns_remote_identity() {
        let store = MemoryStore::new();
        let mut workspace = Workspace::new("Personal");
        workspace.meta.is_dirty = false;
        workspace.meta.remote_id = Some(RemoteId(1));
        store.put(&workspace).unwrap();

        let project = Project::new("New", workspace.local_id());
        store.put(&project).unwrap();

        let mut echo = wire_project(42, "New", 1);
        echo.at = Utc::now();
        apply_push_echo(&store, project.local_id(), &WireRecord::Project(echo.clone())).unwrap();

        let synced: Project = store.get(project.local_id()).unwrap().unwrap();
        assert_eq!(synced.meta.remote_id, Some(RemoteId(42)));
        assert!(!synced.meta.is_dirty);
        assert_eq!(synced.meta.modified_at, echo.at);
        assert!(store.base_of::<Project>(project.local_id()).unwrap().is_some());
    }

    #[test]
    fn collect_pending_skips_clean_records() {
        let store = MemoryStore::new();
        let mut clean = Workspace::new("Synced");
        clean.meta.is_dirty = false;
        clean.meta.remote_id = Some(RemoteId(1));
        store.put(&clean).unwrap();
        let dirty = Client::new("Acme", clean.local_id());
        store.put(&dirty).unwrap();

        let pending = collect_pending(&store).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, EntityKind::Client);
        assert_eq!(pending[0].local_id, dirty.local_id());
    }

    #[test]
    fn mark_rejected_sets_flag_and_keeps_dirty() {
        let store = MemoryStore::new();
        let workspace = Workspace::new("Personal");
        store.put(&workspace).unwrap();

        mark_rejected(&store, EntityKind::Workspace, workspace.local_id()).unwrap();
        let flagged: Workspace = store.get(workspace.local_id()).unwrap().unwrap();
        assert!(flagged.meta.remote_rejected);
        assert!(flagged.meta.is_dirty);
    }
}
