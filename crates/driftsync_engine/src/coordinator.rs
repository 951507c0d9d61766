//! Sync round orchestration.

use crate::adapter::{StorageAdapter, StoreScope};
use crate::clock::{Clock, SystemClock};
use crate::committer::BatchCommitter;
use crate::config::{CollectionPlan, SyncConfig, UserIdProvider};
use crate::error::{SyncError, SyncResult};
use crate::local::LocalStore;
use crate::pull::ChangeWindowReader;
use crate::push::{stage_collection, ConflictGuard};
use driftsync_protocol::{ChangeSet, SessionId, Timestamp};
use futures::future::try_join_all;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Result of a pull round.
#[derive(Debug, Clone)]
pub struct PullOutcome {
    /// Cleaned remote changes for the local store to apply.
    pub changes: ChangeSet,
    /// The new checkpoint candidate, captured before the window was
    /// read.
    pub checkpoint: Timestamp,
}

/// Result of a full sync round.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    /// Remote changes applied locally.
    pub pulled: usize,
    /// Local changes committed remotely.
    pub pushed: usize,
    /// The checkpoint the local store now holds.
    pub checkpoint: Timestamp,
    /// Duration of the round.
    pub duration: Duration,
}

/// Cumulative statistics across rounds.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Full sync rounds completed.
    pub rounds_completed: u64,
    /// Total documents pulled.
    pub documents_pulled: u64,
    /// Total documents pushed.
    pub documents_pushed: u64,
    /// Push rounds rejected by conflict checks.
    pub conflicts_rejected: u64,
    /// Last error message, if the last round failed.
    pub last_error: Option<String>,
}

/// Orchestrates sync rounds against one remote store.
///
/// A coordinator owns no background tasks and runs one round per
/// call; overlapping calls on the same coordinator are refused with
/// [`SyncInProgress`](SyncError::SyncInProgress); concurrent rounds
/// against one local store must be serialized by the caller.
///
/// [`pull`](SyncCoordinator::pull) and [`push`](SyncCoordinator::push)
/// are the protocol boundary for local stores that drive the rounds
/// themselves; [`sync`](SyncCoordinator::sync) runs a full
/// pull-then-push round against a [`LocalStore`].
pub struct SyncCoordinator {
    config: SyncConfig,
    plans: Vec<CollectionPlan>,
    adapter: Arc<dyn StorageAdapter>,
    session: SessionId,
    clock: Arc<dyn Clock>,
    users: Option<Arc<dyn UserIdProvider>>,
    in_round: AtomicBool,
    stats: RwLock<SyncStats>,
}

impl SyncCoordinator {
    /// Creates a coordinator for the given configuration, adapter and
    /// session.
    ///
    /// Fails if the adapter implements a different storage shape than
    /// the configuration names.
    pub fn new(
        config: SyncConfig,
        adapter: Arc<dyn StorageAdapter>,
        session: SessionId,
    ) -> SyncResult<Self> {
        if adapter.kind() != config.storage {
            return Err(SyncError::Config(format!(
                "adapter implements {:?} but the configuration names {:?}",
                adapter.kind(),
                config.storage
            )));
        }

        let plans = config.plans();
        Ok(SyncCoordinator {
            config,
            plans,
            adapter,
            session,
            clock: Arc::new(SystemClock),
            users: None,
            in_round: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
        })
    }

    /// Replaces the wall clock with an injected time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the user id provider for authenticated rounds.
    pub fn with_user_provider(mut self, users: Arc<dyn UserIdProvider>) -> Self {
        self.users = Some(users);
        self
    }

    /// The session this coordinator stamps onto its writes.
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Cumulative statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Pulls remote changes since `checkpoint`.
    pub async fn pull(&self, checkpoint: Option<Timestamp>) -> SyncResult<PullOutcome> {
        let _guard = self.begin_round()?;
        let result = self.pull_inner(checkpoint).await;
        match &result {
            Ok(outcome) => {
                self.stats.write().documents_pulled += outcome.changes.total_changes() as u64;
            }
            Err(error) => self.record_error(error),
        }
        result
    }

    /// Validates and commits a local change set against the remote
    /// store.
    ///
    /// `checkpoint` must be the instant through which this replica has
    /// incorporated remote state, normally the checkpoint returned by
    /// the pull that opened the round.
    pub async fn push(&self, changes: &ChangeSet, checkpoint: Timestamp) -> SyncResult<()> {
        let _guard = self.begin_round()?;
        let result = self.push_inner(changes, checkpoint).await;
        match &result {
            Ok(()) => {
                self.stats.write().documents_pushed += changes.total_changes() as u64;
            }
            Err(error) => self.record_error(error),
        }
        result
    }

    /// Runs one full round against a local store: pull, apply, advance
    /// the checkpoint, then push pending local changes.
    pub async fn sync<L: LocalStore + ?Sized>(&self, local: &L) -> SyncResult<SyncSummary> {
        let started = Instant::now();
        let _guard = self.begin_round()?;
        let result = self.sync_inner(local, started).await;
        match &result {
            Ok(summary) => {
                let mut stats = self.stats.write();
                stats.rounds_completed += 1;
                stats.documents_pulled += summary.pulled as u64;
                stats.documents_pushed += summary.pushed as u64;
                stats.last_error = None;
            }
            Err(error) => self.record_error(error),
        }
        result
    }

    async fn sync_inner<L: LocalStore + ?Sized>(
        &self,
        local: &L,
        started: Instant,
    ) -> SyncResult<SyncSummary> {
        let checkpoint = local.checkpoint().await?;
        let outcome = self.pull_inner(checkpoint).await?;
        let pulled = outcome.changes.total_changes();

        local.apply_remote_changes(&outcome.changes).await?;
        // The pull is fully incorporated; only now may the checkpoint
        // advance.
        local.set_checkpoint(outcome.checkpoint).await?;

        let pending = local.pending_changes().await?;
        let pushed = pending.total_changes();
        if !pending.is_empty() {
            self.push_inner(&pending, outcome.checkpoint).await?;
            local.mark_pushed().await?;
        }

        info!(pulled, pushed, "sync round complete");
        Ok(SyncSummary {
            pulled,
            pushed,
            checkpoint: outcome.checkpoint,
            duration: started.elapsed(),
        })
    }

    async fn pull_inner(&self, checkpoint: Option<Timestamp>) -> SyncResult<PullOutcome> {
        let scope = self.resolve_scope().await?;
        let since = checkpoint.unwrap_or(Timestamp::ZERO);
        // Captured before any query, so documents written while the
        // reads run land in the next window instead of being dropped.
        let as_of = self.clock.now();

        let reader = ChangeWindowReader::new(self.adapter.as_ref(), &self.session, &scope);
        let changes = reader.read(&self.plans, since, as_of).await?;

        Ok(PullOutcome {
            changes,
            checkpoint: as_of,
        })
    }

    async fn push_inner(&self, changes: &ChangeSet, checkpoint: Timestamp) -> SyncResult<()> {
        let scope = self.resolve_scope().await?;
        if changes.is_empty() {
            return Ok(());
        }

        // Resolve plans and validate shape before any remote I/O.
        let mut rounds = Vec::new();
        for (name, collection_changes) in changes.iter() {
            let plan = self.plan(name)?;
            if let Some(id) = collection_changes.first_overlap() {
                return Err(SyncError::InvalidChangeSet {
                    collection: name.clone(),
                    id,
                });
            }
            rounds.push((plan, collection_changes));
        }

        debug!(total = changes.total_changes(), "push round staged");

        let guard = ConflictGuard::new(self.adapter.as_ref(), &scope);
        try_join_all(
            rounds
                .iter()
                .map(|(plan, collection_changes)| guard.check(plan, collection_changes, checkpoint)),
        )
        .await?;

        let commit_ts = self.clock.now();
        let mut writes = Vec::new();
        for (plan, collection_changes) in &rounds {
            writes.extend(stage_collection(
                plan,
                collection_changes,
                &self.session,
                &scope,
                checkpoint,
                commit_ts,
            ));
        }

        BatchCommitter::new(self.adapter.as_ref(), self.config.commit_policy)
            .commit(&scope, writes)
            .await
    }

    async fn resolve_scope(&self) -> SyncResult<StoreScope> {
        if !self.config.authenticated {
            return Ok(StoreScope::default());
        }

        let users = self.users.as_ref().ok_or(SyncError::InvalidUserId)?;
        let user_id = users
            .user_id()
            .await
            .map_err(|_| SyncError::InvalidUserId)?;
        if user_id.is_empty() {
            return Err(SyncError::InvalidUserId);
        }
        Ok(StoreScope::for_user(user_id))
    }

    fn plan(&self, collection: &str) -> SyncResult<&CollectionPlan> {
        self.plans
            .iter()
            .find(|plan| plan.name == collection)
            .ok_or_else(|| SyncError::CollectionNotConfigured(collection.to_string()))
    }

    fn begin_round(&self) -> SyncResult<RoundGuard<'_>> {
        if self.in_round.swap(true, Ordering::SeqCst) {
            return Err(SyncError::SyncInProgress);
        }
        Ok(RoundGuard {
            flag: &self.in_round,
        })
    }

    fn record_error(&self, error: &SyncError) {
        let mut stats = self.stats.write();
        if error.is_conflict() {
            stats.conflicts_rejected += 1;
        }
        stats.last_error = Some(error.to_string());
    }
}

struct RoundGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
