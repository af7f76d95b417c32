//! Mock network client for tests and offline embedding

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ApiClient, ApiError, ApiResult, ChangesBatch, WireRecord};
use crate::model::EntityKind;

/// Operations the mock has served, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Create(WireRecord),
    Update(WireRecord),
    Delete(WireRecord),
    ChangesSince(Option<DateTime<Utc>>),
}

#[derive(Default)]
struct MockState {
    next_id: i64,
    calls: Vec<MockCall>,
    fail_kinds: HashSet<EntityKind>,
    reject_kinds: HashSet<EntityKind>,
    fail_changes: bool,
    pending_changes: VecDeque<ChangesBatch>,
    server_time: Option<DateTime<Utc>>,
}

/// In-memory [`ApiClient`] double. Assigns incremental remote ids on
/// create, echoes records back stamped with the mock server time, and
/// injects failures per entity kind.
pub struct MockApi {
    state: Mutex<MockState>,
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockApi {
    #[must_use]
    pub fn new() -> Self {
        Self { state: Mutex::new(MockState { next_id: 1000, ..MockState::default() }) }
    }

    /// Make pushes of `kind` fail with a transport error
    pub fn fail_pushes_of(&self, kind: EntityKind) {
        self.state.lock().unwrap().fail_kinds.insert(kind);
    }

    /// Make pushes of `kind` come back rejected by the server
    pub fn reject_pushes_of(&self, kind: EntityKind) {
        self.state.lock().unwrap().reject_kinds.insert(kind);
    }

    /// Stop failing or rejecting pushes of `kind`
    pub fn heal_pushes_of(&self, kind: EntityKind) {
        let mut state = self.state.lock().unwrap();
        state.fail_kinds.remove(&kind);
        state.reject_kinds.remove(&kind);
    }

    /// Make the next `changes_since` fail with a transport error
    pub fn fail_next_changes(&self) {
        self.state.lock().unwrap().fail_changes = true;
    }

    /// Queue a batch to be returned by the next `changes_since`
    pub fn push_changes(&self, batch: ChangesBatch) {
        self.state.lock().unwrap().pending_changes.push_back(batch);
    }

    /// Pin the mock server clock (defaults to the real wall clock)
    pub fn set_server_time(&self, server_time: DateTime<Utc>) {
        self.state.lock().unwrap().server_time = Some(server_time);
    }

    /// Everything the mock has been asked to do so far
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Kinds pushed via create, in arrival order
    #[must_use]
    pub fn created_kinds(&self) -> Vec<EntityKind> {
        self.calls()
            .iter()
            .filter_map(|call| match call {
                MockCall::Create(record) => Some(record.kind()),
                _ => None,
            })
            .collect()
    }

    fn check_push(state: &MockState, kind: EntityKind) -> ApiResult<()> {
        if state.fail_kinds.contains(&kind) {
            return Err(ApiError::Transport(format!("connection lost pushing {kind}")));
        }
        if state.reject_kinds.contains(&kind) {
            return Err(ApiError::Rejected(format!("server refused {kind}")));
        }
        Ok(())
    }

    fn stamp(state: &MockState, record: &mut WireRecord) {
        let now = state.server_time.unwrap_or_else(Utc::now);
        match record {
            WireRecord::Workspace(w) => w.at = now,
            WireRecord::User(u) => u.at = now,
            WireRecord::Client(c) => c.at = now,
            WireRecord::Project(p) => p.at = now,
            WireRecord::Task(t) => t.at = now,
            WireRecord::TimeEntry(e) => e.at = now,
        }
    }

    fn assign_id(state: &mut MockState, record: &mut WireRecord) {
        state.next_id += 1;
        let id = Some(state.next_id);
        match record {
            WireRecord::Workspace(w) => w.id = id,
            WireRecord::User(u) => u.id = id,
            WireRecord::Client(c) => c.id = id,
            WireRecord::Project(p) => p.id = id,
            WireRecord::Task(t) => t.id = id,
            WireRecord::TimeEntry(e) => e.id = id,
        }
    }
}

#[async_trait]
impl ApiClient for MockApi {
    async fn create(&self, record: WireRecord) -> ApiResult<WireRecord> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::Create(record.clone()));
        Self::check_push(&state, record.kind())?;

        let mut echo = record;
        Self::assign_id(&mut state, &mut echo);
        Self::stamp(&state, &mut echo);
        Ok(echo)
    }

    async fn update(&self, record: WireRecord) -> ApiResult<WireRecord> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::Update(record.clone()));
        Self::check_push(&state, record.kind())?;

        let mut echo = record;
        Self::stamp(&state, &mut echo);
        Ok(echo)
    }

    async fn delete(&self, record: WireRecord) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::Delete(record.clone()));
        Self::check_push(&state, record.kind())
    }

    async fn changes_since(&self, since: Option<DateTime<Utc>>) -> ApiResult<ChangesBatch> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::ChangesSince(since));
        if state.fail_changes {
            state.fail_changes = false;
            return Err(ApiError::Transport("connection lost during pull".into()));
        }
        let server_time = state.server_time.unwrap_or_else(Utc::now);
        Ok(state
            .pending_changes
            .pop_front()
            .unwrap_or_else(|| ChangesBatch::at(server_time)))
    }
}
