//! Three-way merge reconciliation
//!
//! Conflict resolution is field-level last-writer-wins with selective
//! override, against the merge base captured at the last successful sync:
//!
//! - no base (first sync): remote wins unconditionally
//! - local field untouched since last sync: remote wins
//! - only the local field changed: local wins
//! - both changed, to different values: remote wins and the merge is
//!   flagged so the orchestrator can surface the discarded edit
//!
//! Tombstones are not merged; the codec applies remote deletions before
//! reconciliation ever runs.

use crate::model::{
    Client, Entity, Project, SyncMeta, Task, TimeEntry, User, Workspace,
};

/// Result of a three-way merge
#[derive(Debug, Clone, PartialEq)]
pub struct Merged<T> {
    pub record: T,
    /// True when at least one field had divergent local and remote edits
    /// and the local value was discarded
    pub conflict: bool,
}

impl<T> Merged<T> {
    const fn clean(record: T) -> Self {
        Self { record, conflict: false }
    }
}

/// Merge one field of a record
pub fn merge_field<V: PartialEq + Clone>(
    base: Option<&V>,
    local: &V,
    remote: &V,
    conflict: &mut bool,
) -> V {
    let Some(base) = base else {
        return remote.clone();
    };
    if local == base {
        return remote.clone();
    }
    if remote == base || local == remote {
        return local.clone();
    }
    *conflict = true;
    remote.clone()
}

/// Metadata of a merged record. The remote clock is authoritative for
/// ordering, so `modified_at` and `deleted_at` always come from the remote
/// side; local identity is preserved when a local record exists.
fn merged_meta(local: Option<&SyncMeta>, remote: &SyncMeta) -> SyncMeta {
    SyncMeta {
        local_id: local.map_or(remote.local_id, |meta| meta.local_id),
        remote_id: remote.remote_id,
        modified_at: remote.modified_at,
        is_dirty: false,
        remote_rejected: false,
        deleted_at: remote.deleted_at,
    }
}

/// Per-entity three-way merge. `remote` is the incoming state already
/// translated into local shape (relations resolved to local ids).
pub trait ThreeWayMerge: Entity {
    fn merge(base: Option<&Self>, local: Option<&Self>, remote: &Self) -> Merged<Self>;
}

impl ThreeWayMerge for Workspace {
    fn merge(base: Option<&Self>, local: Option<&Self>, remote: &Self) -> Merged<Self> {
        let meta = merged_meta(local.map(Entity::meta), remote.meta());
        let (Some(local), Some(base)) = (local, base) else {
            return Merged::clean(Self { meta, ..remote.clone() });
        };
        let mut conflict = false;
        let record = Self {
            meta,
            name: merge_field(Some(&base.name), &local.name, &remote.name, &mut conflict),
            admin: merge_field(Some(&base.admin), &local.admin, &remote.admin, &mut conflict),
        };
        Merged { record, conflict }
    }
}

impl ThreeWayMerge for User {
    fn merge(base: Option<&Self>, local: Option<&Self>, remote: &Self) -> Merged<Self> {
        let meta = merged_meta(local.map(Entity::meta), remote.meta());
        let (Some(local), Some(base)) = (local, base) else {
            return Merged::clean(Self { meta, ..remote.clone() });
        };
        let mut conflict = false;
        let record = Self {
            meta,
            fullname: merge_field(
                Some(&base.fullname),
                &local.fullname,
                &remote.fullname,
                &mut conflict,
            ),
            email: merge_field(Some(&base.email), &local.email, &remote.email, &mut conflict),
            default_workspace: merge_field(
                Some(&base.default_workspace),
                &local.default_workspace,
                &remote.default_workspace,
                &mut conflict,
            ),
        };
        Merged { record, conflict }
    }
}

impl ThreeWayMerge for Client {
    fn merge(base: Option<&Self>, local: Option<&Self>, remote: &Self) -> Merged<Self> {
        let meta = merged_meta(local.map(Entity::meta), remote.meta());
        let (Some(local), Some(base)) = (local, base) else {
            return Merged::clean(Self { meta, ..remote.clone() });
        };
        let mut conflict = false;
        let record = Self {
            meta,
            name: merge_field(Some(&base.name), &local.name, &remote.name, &mut conflict),
            workspace: merge_field(
                Some(&base.workspace),
                &local.workspace,
                &remote.workspace,
                &mut conflict,
            ),
        };
        Merged { record, conflict }
    }
}

impl ThreeWayMerge for Project {
    fn merge(base: Option<&Self>, local: Option<&Self>, remote: &Self) -> Merged<Self> {
        let meta = merged_meta(local.map(Entity::meta), remote.meta());
        let (Some(local), Some(base)) = (local, base) else {
            return Merged::clean(Self { meta, ..remote.clone() });
        };
        let mut conflict = false;
        let record = Self {
            meta,
            name: merge_field(Some(&base.name), &local.name, &remote.name, &mut conflict),
            color: merge_field(Some(&base.color), &local.color, &remote.color, &mut conflict),
            active: merge_field(Some(&base.active), &local.active, &remote.active, &mut conflict),
            billable: merge_field(
                Some(&base.billable),
                &local.billable,
                &remote.billable,
                &mut conflict,
            ),
            workspace: merge_field(
                Some(&base.workspace),
                &local.workspace,
                &remote.workspace,
                &mut conflict,
            ),
            client: merge_field(Some(&base.client), &local.client, &remote.client, &mut conflict),
        };
        Merged { record, conflict }
    }
}

impl ThreeWayMerge for Task {
    fn merge(base: Option<&Self>, local: Option<&Self>, remote: &Self) -> Merged<Self> {
        let meta = merged_meta(local.map(Entity::meta), remote.meta());
        let (Some(local), Some(base)) = (local, base) else {
            return Merged::clean(Self { meta, ..remote.clone() });
        };
        let mut conflict = false;
        let record = Self {
            meta,
            name: merge_field(Some(&base.name), &local.name, &remote.name, &mut conflict),
            active: merge_field(Some(&base.active), &local.active, &remote.active, &mut conflict),
            workspace: merge_field(
                Some(&base.workspace),
                &local.workspace,
                &remote.workspace,
                &mut conflict,
            ),
            project: merge_field(
                Some(&base.project),
                &local.project,
                &remote.project,
                &mut conflict,
            ),
        };
        Merged { record, conflict }
    }
}

impl ThreeWayMerge for TimeEntry {
    fn merge(base: Option<&Self>, local: Option<&Self>, remote: &Self) -> Merged<Self> {
        let meta = merged_meta(local.map(Entity::meta), remote.meta());
        let (Some(local), Some(base)) = (local, base) else {
            return Merged::clean(Self { meta, ..remote.clone() });
        };
        let mut conflict = false;
        let record = Self {
            meta,
            description: merge_field(
                Some(&base.description),
                &local.description,
                &remote.description,
                &mut conflict,
            ),
            start: merge_field(Some(&base.start), &local.start, &remote.start, &mut conflict),
            duration_secs: merge_field(
                Some(&base.duration_secs),
                &local.duration_secs,
                &remote.duration_secs,
                &mut conflict,
            ),
            billable: merge_field(
                Some(&base.billable),
                &local.billable,
                &remote.billable,
                &mut conflict,
            ),
            workspace: merge_field(
                Some(&base.workspace),
                &local.workspace,
                &remote.workspace,
                &mut conflict,
            ),
            user: merge_field(Some(&base.user), &local.user, &remote.user, &mut conflict),
            project: merge_field(
                Some(&base.project),
                &local.project,
                &remote.project,
                &mut conflict,
            ),
            task: merge_field(Some(&base.task), &local.task, &remote.task, &mut conflict),
        };
        Merged { record, conflict }
    }
}
