//! Time entry model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, LocalId, Relation, RemoteId, SyncMeta};

/// A tracked span of time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub meta: SyncMeta,
    pub description: String,
    pub start: DateTime<Utc>,
    /// `None` while the entry is still running
    pub duration_secs: Option<i64>,
    pub billable: bool,
    pub workspace: LocalId,
    pub user: LocalId,
    pub project: Option<LocalId>,
    pub task: Option<LocalId>,
}

impl TimeEntry {
    /// Start a new running entry at the given (corrected) wall-clock time
    #[must_use]
    pub fn start_running(
        description: impl Into<String>,
        workspace: LocalId,
        user: LocalId,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            meta: SyncMeta::new_local(),
            description: description.into(),
            start,
            duration_secs: None,
            billable: false,
            workspace,
            user,
            project: None,
            task: None,
        }
    }

    /// True while the entry has no recorded duration
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.duration_secs.is_none()
    }

    /// Stop a running entry at the given (corrected) wall-clock time.
    /// No-op on an already stopped entry.
    pub fn stop(&mut self, now: DateTime<Utc>) {
        if self.is_running() {
            self.duration_secs = Some((now - self.start).num_seconds().max(0));
            self.meta.touch();
        }
    }

    /// Duration of the entry; for a running entry, elapsed up to `now`.
    /// Callers should pass a clock-corrected `now` so durations stay
    /// accurate on devices with skewed clocks.
    #[must_use]
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        self.duration_secs.map_or_else(
            || std::cmp::max(now - self.start, Duration::zero()),
            Duration::seconds,
        )
    }
}

impl Entity for TimeEntry {
    const KIND: EntityKind = EntityKind::TimeEntry;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn relations(&self) -> Vec<Relation> {
        let mut relations = vec![
            Relation::new(EntityKind::Workspace, self.workspace),
            Relation::new(EntityKind::User, self.user),
        ];
        if let Some(project) = self.project {
            relations.push(Relation::new(EntityKind::Project, project));
        }
        if let Some(task) = self.task {
            relations.push(Relation::new(EntityKind::Task, task));
        }
        relations
    }

    fn placeholder(remote_id: RemoteId) -> Self {
        Self {
            meta: SyncMeta::placeholder(remote_id),
            description: String::new(),
            start: super::placeholder_timestamp(),
            duration_secs: Some(0),
            billable: false,
            workspace: LocalId::new(),
            user: LocalId::new(),
            project: None,
            task: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_entry_duration_tracks_now() {
        let start = Utc::now();
        let entry = TimeEntry::start_running("work", LocalId::new(), LocalId::new(), start);
        assert!(entry.is_running());

        let now = start + Duration::seconds(90);
        assert_eq!(entry.duration(now), Duration::seconds(90));
    }

    #[test]
    fn stop_freezes_duration() {
        let start = Utc::now();
        let mut entry = TimeEntry::start_running("work", LocalId::new(), LocalId::new(), start);
        entry.meta.is_dirty = false;

        entry.stop(start + Duration::seconds(120));
        assert_eq!(entry.duration_secs, Some(120));
        assert!(entry.meta.is_dirty);

        // Stopping again changes nothing
        entry.stop(start + Duration::seconds(300));
        assert_eq!(entry.duration_secs, Some(120));
    }

    #[test]
    fn duration_never_negative() {
        let start = Utc::now();
        let entry = TimeEntry::start_running("work", LocalId::new(), LocalId::new(), start);
        assert_eq!(entry.duration(start - Duration::seconds(5)), Duration::zero());
    }
}
