//! Sync orchestration
//!
//! One [`SyncManager`] run is pull, then push. The pull feeds every
//! incoming record through codec/resolver/merge and moves the high-water
//! timestamp only after the whole batch commits. The push builds a fresh
//! dependency graph over everything awaiting push and walks it in waves:
//! each wave pushes all ready records concurrently (bounded), then applies
//! the results sequentially before computing the next wave, so a record is
//! never pushed before its dependencies and a failure only takes down its
//! own branch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, WireRecord};
use crate::bus::MessageBus;
use crate::clock::ClockService;
use crate::codec::{self, PushOp};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, NodeKey};
use crate::store::{Store, STATE_LAST_SYNCED_AT};

/// What a sync run should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Pull,
    Push,
    Full,
    /// Push if the last successful run is recent, otherwise full
    Auto,
}

/// Published when a run starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStarted {
    pub mode: SyncMode,
}

/// Published when a run ends, fatally or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFinished {
    pub mode: SyncMode,
    pub had_errors: bool,
    pub fatal: Option<String>,
}

/// Published when credentials change out from under the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthChanged;

/// Published when the server turns away our credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailed {
    pub reason: String,
}

/// Outcome of one completed (non-fatal) run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: SyncMode,
    /// Records applied from the pull batch (tombstones included)
    pub pulled: usize,
    /// Records resolved by the push cycle (local discards included)
    pub pushed: usize,
    /// Field-level conflicts where a local edit was discarded
    pub conflicts: usize,
    /// Soft failures occurred; affected records retry next run
    pub had_errors: bool,
}

impl SyncReport {
    const fn new(mode: SyncMode) -> Self {
        Self { mode, pulled: 0, pushed: 0, conflicts: 0, had_errors: false }
    }
}

enum PushOutcome {
    Echo(WireRecord),
    Deleted,
}

/// A push operation that actually goes over the wire
enum NetOp {
    Create(WireRecord),
    Update(WireRecord),
    Delete(WireRecord),
}

/// Drives pull and push cycles over a storage context and network client.
/// Collaborators arrive via the constructor; there is no global state.
pub struct SyncManager<S: Store, A: ApiClient> {
    store: Arc<S>,
    api: Arc<A>,
    clock: Arc<ClockService>,
    bus: Arc<MessageBus>,
    config: SyncConfig,
    running: AtomicBool,
}

impl<S: Store, A: ApiClient> SyncManager<S, A> {
    #[must_use]
    pub fn new(
        store: Arc<S>,
        api: Arc<A>,
        clock: Arc<ClockService>,
        bus: Arc<MessageBus>,
        config: SyncConfig,
    ) -> Self {
        Self { store, api, clock, bus, config, running: AtomicBool::new(false) }
    }

    /// True while a run is in flight
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one sync cycle. Refuses to overlap with an in-flight run;
    /// there is no mid-run cancellation, a run either completes (possibly
    /// with `had_errors`) or aborts fatally.
    pub async fn sync(&self, mode: SyncMode) -> Result<SyncReport> {
        let _guard = RunGuard::acquire(&self.running)?;
        let mode = self.resolve_mode(mode)?;
        info!(?mode, "sync run starting");
        self.bus.send(SyncStarted { mode });

        match self.run(mode).await {
            Ok(report) => {
                info!(
                    pulled = report.pulled,
                    pushed = report.pushed,
                    had_errors = report.had_errors,
                    "sync run finished"
                );
                self.bus.send(SyncFinished {
                    mode,
                    had_errors: report.had_errors,
                    fatal: None,
                });
                Ok(report)
            }
            Err(error) => {
                warn!(%error, "sync run aborted");
                self.bus.send(SyncFinished {
                    mode,
                    had_errors: true,
                    fatal: Some(error.to_string()),
                });
                Err(error)
            }
        }
    }

    fn resolve_mode(&self, mode: SyncMode) -> Result<SyncMode> {
        if mode != SyncMode::Auto {
            return Ok(mode);
        }
        let recent = self
            .last_synced_at()?
            .is_some_and(|at| Utc::now() - at < self.config.full_sync_threshold());
        Ok(if recent { SyncMode::Push } else { SyncMode::Full })
    }

    fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.store.load_state(STATE_LAST_SYNCED_AT)? else {
            return Ok(None);
        };
        let parsed = DateTime::parse_from_rfc3339(&raw)
            .map_err(|error| Error::Store(format!("bad last-synced timestamp: {error}")))?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    async fn run(&self, mode: SyncMode) -> Result<SyncReport> {
        let mut report = SyncReport::new(mode);
        if matches!(mode, SyncMode::Pull | SyncMode::Full) {
            let pull_ok = self.pull(&mut report).await?;
            if !pull_ok {
                // Transport failure: nothing was applied, records stay
                // dirty, next run retries. Pushing against a server we
                // just failed to reach is pointless.
                return Ok(report);
            }
        }
        if matches!(mode, SyncMode::Push | SyncMode::Full) {
            self.push(&mut report).await?;
        }
        self.clock.save(&*self.store)?;
        Ok(report)
    }

    /// Pull and apply remote changes. Returns `false` on a soft transport
    /// failure.
    async fn pull(&self, report: &mut SyncReport) -> Result<bool> {
        let since = self.last_synced_at()?;
        let started = Instant::now();
        let batch = match self.api.changes_since(since).await {
            Ok(batch) => batch,
            Err(ApiError::Transport(message)) => {
                warn!(%message, "pull failed; will retry next run");
                report.had_errors = true;
                return Ok(false);
            }
            Err(error @ ApiError::Rejected(_)) => {
                return Err(Error::Fatal(format!("pull rejected: {error}")));
            }
        };
        self.clock.record(batch.server_time, started.elapsed())?;

        let summary = self
            .store
            .in_transaction(|store| codec::ingest_batch(store, &batch))?;
        // High-water mark moves only once the whole batch is committed
        self.store
            .save_state(STATE_LAST_SYNCED_AT, &batch.server_time.to_rfc3339())?;

        debug!(applied = summary.applied, conflicts = summary.conflicts, "pull applied");
        report.pulled = summary.applied;
        report.conflicts += summary.conflicts;
        Ok(true)
    }

    /// Push everything awaiting sync, leaves of the dependency graph first
    async fn push(&self, report: &mut SyncReport) -> Result<()> {
        let pending = codec::collect_pending(&*self.store)?;
        let mut graph = DependencyGraph::build(&pending);
        debug!(records = graph.len(), "push cycle starting");
        let semaphore = Arc::new(Semaphore::new(self.config.push_parallelism.max(1)));

        while !graph.is_empty() {
            let wave = graph.take_ready();
            if wave.is_empty() {
                return Err(Error::Fatal(
                    "dependency cycle among records awaiting push".into(),
                ));
            }

            let mut tasks: JoinSet<(NodeKey, StdDuration, std::result::Result<PushOutcome, ApiError>)> =
                JoinSet::new();
            for key in wave {
                let op = match codec::push_payload(&*self.store, key.0, key.1)? {
                    PushOp::DiscardLocal => {
                        // Tombstoned and never synced: the server has
                        // nothing to be told
                        codec::purge_local(&*self.store, key.0, key.1)?;
                        graph.complete(key);
                        report.pushed += 1;
                        continue;
                    }
                    PushOp::Create(wire) => NetOp::Create(wire),
                    PushOp::Update(wire) => NetOp::Update(wire),
                    PushOp::Delete(wire) => NetOp::Delete(wire),
                };
                let api = Arc::clone(&self.api);
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return (
                            key,
                            StdDuration::ZERO,
                            Err(ApiError::Transport("push scheduler closed".into())),
                        );
                    };
                    let started = Instant::now();
                    let outcome = match op {
                        NetOp::Create(wire) => api.create(wire).await.map(PushOutcome::Echo),
                        NetOp::Update(wire) => api.update(wire).await.map(PushOutcome::Echo),
                        NetOp::Delete(wire) => {
                            api.delete(wire).await.map(|()| PushOutcome::Deleted)
                        }
                    };
                    (key, started.elapsed(), outcome)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let (key, elapsed, outcome) = joined
                    .map_err(|error| Error::Fatal(format!("push task panicked: {error}")))?;
                match outcome {
                    Ok(PushOutcome::Echo(echo)) => {
                        self.clock.record(echo.at(), elapsed)?;
                        self.store
                            .in_transaction(|store| codec::apply_push_echo(store, key.1, &echo))?;
                        graph.complete(key);
                        report.pushed += 1;
                    }
                    Ok(PushOutcome::Deleted) => {
                        self.store
                            .in_transaction(|store| codec::purge_local(store, key.0, key.1))?;
                        graph.complete(key);
                        report.pushed += 1;
                    }
                    Err(ApiError::Transport(message)) => {
                        let removed = graph.fail(key);
                        warn!(
                            kind = %key.0,
                            local_id = %key.1,
                            branch = removed.len(),
                            %message,
                            "push failed; branch deferred to next run"
                        );
                        report.had_errors = true;
                    }
                    Err(ApiError::Rejected(message)) => {
                        codec::mark_rejected(&*self.store, key.0, key.1)?;
                        let removed = graph.fail(key);
                        warn!(
                            kind = %key.0,
                            local_id = %key.1,
                            branch = removed.len(),
                            %message,
                            "push rejected by server"
                        );
                        report.had_errors = true;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Clears the running flag on every exit path
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::AlreadyRunning)?;
        Ok(Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::api::MockApi;
    use crate::store::MemoryStore;

    fn manager(store: Arc<MemoryStore>, api: Arc<MockApi>) -> SyncManager<MemoryStore, MockApi> {
        SyncManager::new(
            store,
            api,
            Arc::new(ClockService::default()),
            MessageBus::new(),
            SyncConfig::default(),
        )
    }

    #[tokio::test]
    async fn auto_resolves_to_full_without_history() {
        let manager = manager(Arc::new(MemoryStore::new()), Arc::new(MockApi::new()));
        assert_eq!(manager.resolve_mode(SyncMode::Auto).unwrap(), SyncMode::Full);
    }

    #[tokio::test]
    async fn auto_resolves_to_push_after_recent_run() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_state(STATE_LAST_SYNCED_AT, &Utc::now().to_rfc3339())
            .unwrap();
        let manager = manager(store, Arc::new(MockApi::new()));
        assert_eq!(manager.resolve_mode(SyncMode::Auto).unwrap(), SyncMode::Push);
    }

    #[tokio::test]
    async fn auto_resolves_to_full_after_stale_run() {
        let store = Arc::new(MemoryStore::new());
        let stale = Utc::now() - chrono::Duration::hours(2);
        store
            .save_state(STATE_LAST_SYNCED_AT, &stale.to_rfc3339())
            .unwrap();
        let manager = manager(store, Arc::new(MockApi::new()));
        assert_eq!(manager.resolve_mode(SyncMode::Auto).unwrap(), SyncMode::Full);
    }

    #[tokio::test]
    async fn pull_transport_failure_is_soft() {
        let api = Arc::new(MockApi::new());
        api.fail_next_changes();
        let manager = manager(Arc::new(MemoryStore::new()), api);

        let report = manager.sync(SyncMode::Pull).await.unwrap();
        assert!(report.had_errors);
        assert_eq!(report.pulled, 0);
    }

    #[tokio::test]
    async fn run_flag_clears_after_completion() {
        let manager = manager(Arc::new(MemoryStore::new()), Arc::new(MockApi::new()));
        assert!(!manager.is_running());
        manager.sync(SyncMode::Full).await.unwrap();
        assert!(!manager.is_running());
    }
}
