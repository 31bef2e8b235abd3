//! Sync orchestration: the queue-draining state machine.
//!
//! The engine is the single owner of queue state. Consumers issue
//! commands (submit, sync, resolve, retry, cancel) and read snapshots;
//! state-change notifications arrive over a broadcast subscription
//! instead of side effects buried in the write path.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use crate::db::{Database, QueueStore, SqliteQueueStore};
use crate::error::{Error, Result};
use crate::models::{
    ConflictKind, ConflictReport, LocalWrite, OperationId, OperationPatch, OperationStatus,
    OperationType, QueuedOperation, SessionContext,
};
use crate::net::{Connectivity, ConnectivityMonitor, MonitorConfig};
use crate::remote::{RemoteError, RemoteRecord, RemoteStore};
use crate::sync::detector;
use crate::sync::resolver::{self, ResolutionAction, ResolutionStrategy};
use crate::sync::retry::{Disposition, RetryPolicy};

/// Engine tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Transient failure handling
    pub retry: RetryPolicy,
    /// Degraded-mode detection window
    pub monitor: MonitorConfig,
    /// Buffered events per subscriber before lagging
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            monitor: MonitorConfig::default(),
            event_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Override the retry policy
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the degraded-mode window
    #[must_use]
    pub const fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }
}

/// Run progress polled by status consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Progress {
    /// Operations handled so far in this run, including the current one
    pub current: usize,
    /// Size of the due set when the run started
    pub total: usize,
}

/// Outcome counters for one completed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SyncRunSummary {
    pub total: usize,
    pub synced: usize,
    pub deferred: usize,
    pub conflicts: usize,
    pub failed: usize,
    pub auth_blocked: usize,
    pub skipped: usize,
    /// The run stopped early because connectivity dropped
    pub interrupted: bool,
    pub started_at: i64,
    pub finished_at: i64,
}

/// Result of a sync trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRun {
    /// This trigger drove the run to completion
    Completed(SyncRunSummary),
    /// Another run was in progress; the trigger coalesced into it
    AlreadyRunning,
}

/// Where a submitted write ended up
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Written straight to the remote store
    Applied,
    /// Durably queued for a later sync run
    Queued(QueuedOperation),
}

/// Result of a conflict resolution command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Back in the pending queue for the next run
    Requeued,
    /// Dropped in favor of the server state
    Discarded,
    /// Nothing to do; the operation was already settled or dequeued
    AlreadyResolved,
}

/// State-change notification delivered to subscribers
#[derive(Debug, Clone)]
pub enum SyncEvent {
    ConnectivityChanged(Connectivity),
    OperationQueued { id: OperationId },
    SyncStarted { total: usize },
    OperationSynced { id: OperationId },
    OperationDeferred { id: OperationId, retry_in: Duration },
    ConflictDetected { id: OperationId, kind: ConflictKind },
    OperationFailed { id: OperationId, error: String },
    AuthRequired { id: OperationId },
    AuthReleased { released: usize },
    OperationResolved { id: OperationId, strategy: ResolutionStrategy },
    OperationCancelled { id: OperationId },
    SyncFinished(SyncRunSummary),
}

/// Read-only snapshot of engine state for status surfaces
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    pub connectivity: Connectivity,
    pub is_syncing: bool,
    pub pending_count: usize,
    pub conflict_count: usize,
    pub failed_count: usize,
    pub auth_blocked_count: usize,
    pub progress: Option<Progress>,
    pub last_sync: Option<SyncRunSummary>,
}

struct Shared {
    db: Mutex<Database>,
    monitor: Mutex<ConnectivityMonitor>,
    syncing: AtomicBool,
    progress: Mutex<Option<Progress>>,
    last_sync: Mutex<Option<SyncRunSummary>>,
}

/// Long-lived sync service shared by every interface of the app.
///
/// Cheap to clone; all clones share one queue, one monitor, and one
/// event channel.
pub struct SyncEngine<R> {
    shared: Arc<Shared>,
    remote: Arc<R>,
    events: broadcast::Sender<SyncEvent>,
    config: EngineConfig,
    session: SessionContext,
}

impl<R> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            remote: Arc::clone(&self.remote),
            events: self.events.clone(),
            config: self.config,
            session: self.session.clone(),
        }
    }
}

enum ApplyOutcome {
    Applied,
    Conflict(ConflictReport),
}

enum StepOutcome {
    Synced,
    Deferred,
    Conflict,
    Failed,
    AuthBlocked,
    Skipped,
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Initialize the engine over an already-open database
    #[must_use]
    pub fn open(db: Database, remote: R, session: SessionContext, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            shared: Arc::new(Shared {
                db: Mutex::new(db),
                monitor: Mutex::new(ConnectivityMonitor::new(config.monitor)),
                syncing: AtomicBool::new(false),
                progress: Mutex::new(None),
                last_sync: Mutex::new(None),
            }),
            remote: Arc::new(remote),
            events,
            config,
            session,
        }
    }

    /// Initialize the engine with a queue database at the given path
    pub fn open_path(
        db_path: impl AsRef<Path>,
        remote: R,
        session: SessionContext,
        config: EngineConfig,
    ) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(db_path)?;
        Ok(Self::open(db, remote, session, config))
    }

    /// Tear the engine down.
    ///
    /// Queue contents are durable; disposing mid-run leaves interrupted
    /// operations pending for the next engine instance.
    pub fn dispose(self) {
        if self.shared.syncing.load(Ordering::SeqCst) {
            tracing::warn!("sync engine disposed while a run was in progress");
        }
        tracing::debug!("sync engine disposed");
    }

    /// Subscribe to state-change events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// The remote store this engine drains into
    #[must_use]
    pub fn remote(&self) -> &R {
        &self.remote
    }

    fn emit(&self, event: SyncEvent) {
        // send only fails when nobody is subscribed
        let _ = self.events.send(event);
    }

    /// Record a connectivity transition. Coming back online drains the
    /// queue; the run summary is returned when this call drove it.
    pub async fn set_online(&self, online: bool) -> Result<Option<SyncRunSummary>> {
        let changed = {
            let mut monitor = self.shared.monitor.lock().await;
            monitor.set_online(online)
        };
        if !changed {
            return Ok(None);
        }

        let state = self.connectivity().await;
        tracing::info!(%state, "connectivity changed");
        self.emit(SyncEvent::ConnectivityChanged(state));

        if online {
            match self.sync().await? {
                SyncRun::Completed(summary) => return Ok(Some(summary)),
                SyncRun::AlreadyRunning => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Current connectivity state
    pub async fn connectivity(&self) -> Connectivity {
        self.shared.monitor.lock().await.state()
    }

    /// Intercept a local write: apply directly while online, queue when
    /// offline or when the direct write fails at the transport level.
    pub async fn submit(&self, write: LocalWrite) -> Result<SubmitOutcome> {
        if write.op_type == OperationType::Create {
            write.resource.validate_create_payload(&write.payload)?;
        }

        let online = { self.shared.monitor.lock().await.is_online() };
        if online {
            match self.apply_direct(&write).await {
                Ok(()) => {
                    self.record_outcome(true).await;
                    return Ok(SubmitOutcome::Applied);
                }
                Err(error) if error.is_transport() => {
                    self.record_outcome(false).await;
                    tracing::debug!(%error, "direct write failed; queueing for sync");
                }
                Err(error) => {
                    self.record_outcome(true).await;
                    return Err(Error::Remote(error));
                }
            }
        }

        let op = QueuedOperation::new(write, &self.session);
        {
            let db = self.shared.db.lock().await;
            let store = SqliteQueueStore::new(db.connection());
            store.enqueue(&op)?;
        }
        tracing::debug!(id = %op.id, resource = %op.resource, "operation queued");
        self.emit(SyncEvent::OperationQueued { id: op.id });
        Ok(SubmitOutcome::Queued(op))
    }

    async fn apply_direct(&self, write: &LocalWrite) -> std::result::Result<(), RemoteError> {
        match write.op_type {
            OperationType::Create => {
                self.remote
                    .create(write.resource, &write.record_id, &write.payload)
                    .await
            }
            OperationType::Update => self
                .remote
                .update(write.resource, &write.record_id, &write.payload)
                .await
                .map(|_| ()),
            OperationType::Delete => self.remote.delete(write.resource, &write.record_id).await,
        }
    }

    /// All queued operations in store order
    pub async fn list_queue(&self) -> Result<Vec<QueuedOperation>> {
        let db = self.shared.db.lock().await;
        let store = SqliteQueueStore::new(db.connection());
        store.list()
    }

    /// Read-only status snapshot
    pub async fn status(&self) -> Result<StatusSnapshot> {
        let counts = {
            let db = self.shared.db.lock().await;
            let store = SqliteQueueStore::new(db.connection());
            store.counts()?
        };
        Ok(StatusSnapshot {
            connectivity: self.connectivity().await,
            is_syncing: self.shared.syncing.load(Ordering::SeqCst),
            pending_count: counts.pending,
            conflict_count: counts.needs_review,
            failed_count: counts.failed,
            auth_blocked_count: counts.pending_auth,
            progress: *self.shared.progress.lock().await,
            last_sync: *self.shared.last_sync.lock().await,
        })
    }

    /// Drain the due set. A second trigger while a run is active is
    /// coalesced into a no-op; callers observe the same run completing.
    pub async fn sync(&self) -> Result<SyncRun> {
        if self
            .shared
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("sync already running; trigger coalesced");
            return Ok(SyncRun::AlreadyRunning);
        }

        let result = self.run_queue().await;

        *self.shared.progress.lock().await = None;
        self.shared.syncing.store(false, Ordering::SeqCst);

        let summary = result?;
        *self.shared.last_sync.lock().await = Some(summary);
        self.emit(SyncEvent::SyncFinished(summary));
        Ok(SyncRun::Completed(summary))
    }

    async fn run_queue(&self) -> Result<SyncRunSummary> {
        let started_at = now_ms();
        let due = {
            let db = self.shared.db.lock().await;
            let store = SqliteQueueStore::new(db.connection());
            store.due(started_at)?
        };

        let mut summary = SyncRunSummary {
            total: due.len(),
            started_at,
            ..SyncRunSummary::default()
        };
        *self.shared.progress.lock().await = Some(Progress {
            current: 0,
            total: summary.total,
        });
        tracing::info!(total = summary.total, "sync run started");
        self.emit(SyncEvent::SyncStarted {
            total: summary.total,
        });

        for (index, op) in due.into_iter().enumerate() {
            if !self.shared.monitor.lock().await.is_online() {
                tracing::info!("connectivity lost; leaving remaining operations pending");
                summary.interrupted = true;
                break;
            }

            *self.shared.progress.lock().await = Some(Progress {
                current: index + 1,
                total: summary.total,
            });

            match self.process_one(op).await? {
                StepOutcome::Synced => summary.synced += 1,
                StepOutcome::Deferred => summary.deferred += 1,
                StepOutcome::Conflict => summary.conflicts += 1,
                StepOutcome::Failed => summary.failed += 1,
                StepOutcome::AuthBlocked => summary.auth_blocked += 1,
                StepOutcome::Skipped => summary.skipped += 1,
            }
        }

        summary.finished_at = now_ms();
        tracing::info!(
            synced = summary.synced,
            deferred = summary.deferred,
            conflicts = summary.conflicts,
            failed = summary.failed,
            "sync run finished"
        );
        Ok(summary)
    }

    /// Apply one due operation. Local store failures propagate; remote
    /// failures are absorbed into the operation's state so one bad
    /// record never aborts the whole run.
    async fn process_one(&self, snapshot: QueuedOperation) -> Result<StepOutcome> {
        let id = snapshot.id;
        let op = {
            let db = self.shared.db.lock().await;
            let store = SqliteQueueStore::new(db.connection());
            match store.get(&id)? {
                // cancelled (or settled) after the due set was taken
                None => return Ok(StepOutcome::Skipped),
                Some(op) if op.status != OperationStatus::Pending => {
                    return Ok(StepOutcome::Skipped)
                }
                Some(op) => {
                    store.update(&id, &OperationPatch::with_status(OperationStatus::Syncing))?;
                    op
                }
            }
        };

        let result = self.apply_remote(&op).await;

        match result {
            Ok(ApplyOutcome::Applied) => {
                self.record_outcome(true).await;
                {
                    let db = self.shared.db.lock().await;
                    let store = SqliteQueueStore::new(db.connection());
                    store.dequeue(&id)?;
                }
                tracing::debug!(%id, "operation synced");
                self.emit(SyncEvent::OperationSynced { id });
                Ok(StepOutcome::Synced)
            }
            Ok(ApplyOutcome::Conflict(report)) => {
                self.record_outcome(true).await;
                let patch = OperationPatch {
                    status: Some(OperationStatus::NeedsReview),
                    error: Some(Some(report.summary())),
                    ..OperationPatch::default()
                };
                if !self.patch_or_skip(&id, &patch).await? {
                    return Ok(StepOutcome::Skipped);
                }
                tracing::info!(%id, kind = %report.kind, "conflict detected");
                self.emit(SyncEvent::ConflictDetected {
                    id,
                    kind: report.kind,
                });
                Ok(StepOutcome::Conflict)
            }
            Err(error) => {
                self.record_outcome(!error.is_transport()).await;
                let degraded = self.connectivity().await == Connectivity::Degraded;
                match self
                    .config
                    .retry
                    .classify(&error, op.attempts_in_window(), degraded)
                {
                    Disposition::Retry { delay } => {
                        let patch = OperationPatch {
                            status: Some(OperationStatus::Pending),
                            retry_count: Some(op.retry_count + 1),
                            error: Some(None),
                            next_attempt_at: Some(now_ms() + as_ms(delay)),
                            ..OperationPatch::default()
                        };
                        if !self.patch_or_skip(&id, &patch).await? {
                            return Ok(StepOutcome::Skipped);
                        }
                        tracing::warn!(%id, %error, retry_in = ?delay, "transient failure; deferred");
                        self.emit(SyncEvent::OperationDeferred { id, retry_in: delay });
                        Ok(StepOutcome::Deferred)
                    }
                    Disposition::Exhausted => {
                        let patch = OperationPatch {
                            status: Some(OperationStatus::Failed),
                            retry_count: Some(op.retry_count + 1),
                            error: Some(Some(error.to_string())),
                            ..OperationPatch::default()
                        };
                        if !self.patch_or_skip(&id, &patch).await? {
                            return Ok(StepOutcome::Skipped);
                        }
                        tracing::warn!(%id, %error, "retry budget exhausted; awaiting manual retry");
                        self.emit(SyncEvent::OperationFailed {
                            id,
                            error: error.to_string(),
                        });
                        Ok(StepOutcome::Failed)
                    }
                    Disposition::AwaitAuth => {
                        let patch = OperationPatch {
                            status: Some(OperationStatus::PendingAuth),
                            error: Some(None),
                            ..OperationPatch::default()
                        };
                        if !self.patch_or_skip(&id, &patch).await? {
                            return Ok(StepOutcome::Skipped);
                        }
                        tracing::warn!(%id, "session expired; operation paused");
                        self.emit(SyncEvent::AuthRequired { id });
                        Ok(StepOutcome::AuthBlocked)
                    }
                    Disposition::Reject { reason } => {
                        let patch = OperationPatch {
                            status: Some(OperationStatus::Failed),
                            error: Some(Some(reason.clone())),
                            ..OperationPatch::default()
                        };
                        if !self.patch_or_skip(&id, &patch).await? {
                            return Ok(StepOutcome::Skipped);
                        }
                        tracing::warn!(%id, %reason, "rejected by remote; awaiting user action");
                        self.emit(SyncEvent::OperationFailed { id, error: reason });
                        Ok(StepOutcome::Failed)
                    }
                }
            }
        }
    }

    /// Apply `patch`; a vanished row means the operation was cancelled
    /// while its call was in flight, and the result is discarded.
    async fn patch_or_skip(&self, id: &OperationId, patch: &OperationPatch) -> Result<bool> {
        let db = self.shared.db.lock().await;
        let store = SqliteQueueStore::new(db.connection());
        match store.update(id, patch) {
            Ok(_) => Ok(true),
            Err(Error::OperationNotFound(_)) => {
                tracing::debug!(%id, "operation cancelled mid-flight; result discarded");
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    async fn apply_remote(
        &self,
        op: &QueuedOperation,
    ) -> std::result::Result<ApplyOutcome, RemoteError> {
        match op.op_type {
            OperationType::Create => {
                self.remote
                    .create(op.resource, &op.record_id, &op.payload)
                    .await?;
                Ok(ApplyOutcome::Applied)
            }
            OperationType::Update => {
                if op.base_snapshot.is_none() {
                    // requeued after a deleted-remotely resolution:
                    // apply as an idempotent create
                    self.remote
                        .create(op.resource, &op.record_id, &op.payload)
                        .await?;
                    return Ok(ApplyOutcome::Applied);
                }
                let current = self.fetch_current(op).await?;
                if let Some(report) = detector::detect(op, current.as_ref()) {
                    return Ok(ApplyOutcome::Conflict(report));
                }
                self.remote
                    .update(op.resource, &op.record_id, &op.payload)
                    .await?;
                Ok(ApplyOutcome::Applied)
            }
            OperationType::Delete => {
                let current = self.fetch_current(op).await?;
                if let Some(report) = detector::detect(op, current.as_ref()) {
                    return Ok(ApplyOutcome::Conflict(report));
                }
                match self.remote.delete(op.resource, &op.record_id).await {
                    // gone between the clean check and the delete
                    Ok(()) | Err(RemoteError::NotFound) => Ok(ApplyOutcome::Applied),
                    Err(error) => Err(error),
                }
            }
        }
    }

    async fn fetch_current(
        &self,
        op: &QueuedOperation,
    ) -> std::result::Result<Option<RemoteRecord>, RemoteError> {
        match self.remote.fetch(op.resource, &op.record_id).await {
            Ok(record) => Ok(Some(record)),
            Err(RemoteError::NotFound) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Settle a reviewed conflict. The report is re-derived from the
    /// current remote state; resolving an operation that was already
    /// settled or dequeued is a harmless no-op.
    pub async fn resolve_conflict(
        &self,
        id: &OperationId,
        strategy: ResolutionStrategy,
        merged: Option<RemoteRecord>,
    ) -> Result<ResolveOutcome> {
        let op = {
            let db = self.shared.db.lock().await;
            let store = SqliteQueueStore::new(db.connection());
            store.get(id)?
        };
        let Some(op) = op else {
            return Ok(ResolveOutcome::AlreadyResolved);
        };
        if op.status != OperationStatus::NeedsReview {
            return Ok(ResolveOutcome::AlreadyResolved);
        }

        let current = self.fetch_current(&op).await.map_err(Error::Remote)?;
        let Some(report) = detector::detect(&op, current.as_ref()) else {
            // the other side moved again and the conflict evaporated
            let patch = OperationPatch {
                status: Some(OperationStatus::Pending),
                error: Some(None),
                next_attempt_at: Some(now_ms()),
                ..OperationPatch::default()
            };
            self.patch_or_skip(id, &patch).await?;
            self.emit(SyncEvent::OperationResolved { id: *id, strategy });
            return Ok(ResolveOutcome::Requeued);
        };

        match resolver::resolve(&op, &report, strategy, merged.as_ref())? {
            ResolutionAction::Requeue {
                payload,
                base_snapshot,
            } => {
                let patch = OperationPatch {
                    status: Some(OperationStatus::Pending),
                    payload: Some(payload),
                    base_snapshot: Some(base_snapshot),
                    error: Some(None),
                    next_attempt_at: Some(now_ms()),
                    ..OperationPatch::default()
                };
                self.patch_or_skip(id, &patch).await?;
                tracing::info!(%id, %strategy, "conflict resolved; operation requeued");
                self.emit(SyncEvent::OperationResolved { id: *id, strategy });
                Ok(ResolveOutcome::Requeued)
            }
            ResolutionAction::Discard => {
                {
                    let db = self.shared.db.lock().await;
                    let store = SqliteQueueStore::new(db.connection());
                    store.dequeue(id)?;
                }
                tracing::info!(%id, "conflict resolved in favor of remote; operation discarded");
                self.emit(SyncEvent::OperationResolved { id: *id, strategy });
                Ok(ResolveOutcome::Discarded)
            }
        }
    }

    /// Put a failed operation back in the queue with a fresh attempt
    /// window. The cumulative retry count is kept for audit.
    pub async fn retry_operation(&self, id: &OperationId) -> Result<QueuedOperation> {
        let db = self.shared.db.lock().await;
        let store = SqliteQueueStore::new(db.connection());
        let op = store
            .get(id)?
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))?;

        if op.status != OperationStatus::Failed {
            return Err(Error::InvalidInput(format!(
                "only failed operations can be manually retried; {id} is {}",
                op.status
            )));
        }

        let patch = OperationPatch {
            status: Some(OperationStatus::Pending),
            retry_window_base: Some(op.retry_count),
            error: Some(None),
            next_attempt_at: Some(now_ms()),
            ..OperationPatch::default()
        };
        let updated = store.update(id, &patch)?;
        tracing::info!(%id, "failed operation manually requeued");
        Ok(updated)
    }

    /// Remove an operation from the queue. A `syncing` operation's
    /// in-flight call completes but its result is discarded.
    pub async fn cancel_operation(&self, id: &OperationId) -> Result<()> {
        {
            let db = self.shared.db.lock().await;
            let store = SqliteQueueStore::new(db.connection());
            store
                .get(id)?
                .ok_or_else(|| Error::OperationNotFound(id.to_string()))?;
            store.dequeue(id)?;
        }
        tracing::info!(%id, "operation cancelled");
        self.emit(SyncEvent::OperationCancelled { id: *id });
        Ok(())
    }

    /// Release every auth-blocked operation after re-authentication
    pub async fn notify_authenticated(&self) -> Result<usize> {
        let released = {
            let db = self.shared.db.lock().await;
            let store = SqliteQueueStore::new(db.connection());
            store.release_auth_blocked(now_ms())?
        };
        if released > 0 {
            tracing::info!(released, "auth refreshed; operations released");
            self.emit(SyncEvent::AuthReleased { released });
        }
        Ok(released)
    }

    /// Periodic sync trigger for long-running hosts; loops until the
    /// task is dropped. Offline ticks are skipped.
    pub async fn run_periodic(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !self.shared.monitor.lock().await.is_online() {
                continue;
            }
            if let Err(error) = self.sync().await {
                tracing::warn!(%error, "periodic sync failed");
            }
        }
    }

    async fn record_outcome(&self, success: bool) {
        self.shared.monitor.lock().await.record_outcome(success);
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn as_ms(delay: Duration) -> i64 {
    i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::*;
    use crate::remote::testing::ScriptedRemote;
    use crate::models::ResourceKind;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn test_engine() -> SyncEngine<ScriptedRemote> {
        let config = EngineConfig::default().with_retry(RetryPolicy {
            budget: 5,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            degraded_floor: Duration::ZERO,
        });
        SyncEngine::open(
            Database::open_in_memory().unwrap(),
            ScriptedRemote::new(),
            SessionContext::new("user-1", "coop-1"),
            config,
        )
    }

    fn delivery_create(record_id: &str) -> LocalWrite {
        LocalWrite::create(
            ResourceKind::Delivery,
            record_id,
            map(json!({"address": "Calle 12", "weight": 10})),
        )
    }

    async fn queued(engine: &SyncEngine<ScriptedRemote>, write: LocalWrite) -> QueuedOperation {
        match engine.submit(write).await.unwrap() {
            SubmitOutcome::Queued(op) => op,
            SubmitOutcome::Applied => panic!("expected the write to be queued"),
        }
    }

    #[tokio::test]
    async fn offline_create_drains_after_reconnect() {
        let engine = test_engine();
        engine.set_online(false).await.unwrap();

        queued(&engine, delivery_create("d1")).await;
        let status = engine.status().await.unwrap();
        assert_eq!(status.pending_count, 1);

        let summary = engine.set_online(true).await.unwrap().unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.synced, 1);

        let status = engine.status().await.unwrap();
        assert_eq!(status.pending_count, 0);
        assert!(engine.remote().record(ResourceKind::Delivery, "d1").is_some());
    }

    #[tokio::test]
    async fn online_submit_applies_directly() {
        let engine = test_engine();

        let outcome = engine.submit(delivery_create("d1")).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Applied);
        assert!(engine.list_queue().await.unwrap().is_empty());
        assert!(engine.remote().record(ResourceKind::Delivery, "d1").is_some());
    }

    #[tokio::test]
    async fn online_submit_queues_on_transport_failure() {
        let engine = test_engine();
        engine
            .remote()
            .push_failure(RemoteError::Transient("connection reset".to_string()));

        let outcome = engine.submit(delivery_create("d1")).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued(_)));
        assert_eq!(engine.list_queue().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn online_submit_surfaces_validation_errors() {
        let engine = test_engine();
        engine
            .remote()
            .push_failure(RemoteError::Validation("weight must be positive".to_string()));

        let error = engine.submit(delivery_create("d1")).await.unwrap_err();
        assert!(matches!(error, Error::Remote(RemoteError::Validation(_))));
        assert!(engine.list_queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_offline_create_is_rejected() {
        let engine = test_engine();
        engine.set_online(false).await.unwrap();

        queued(&engine, delivery_create("d1")).await;
        let error = engine.submit(delivery_create("d1")).await.unwrap_err();
        assert!(matches!(error, Error::DuplicateOperation { .. }));
    }

    #[tokio::test]
    async fn divergent_update_needs_review_then_local_wins() {
        let engine = test_engine();
        engine
            .remote()
            .seed(ResourceKind::Delivery, "d1", map(json!({"weight": 12})));
        engine.set_online(false).await.unwrap();

        let op = queued(
            &engine,
            LocalWrite::update(
                ResourceKind::Delivery,
                "d1",
                map(json!({"weight": 15})),
                map(json!({"weight": 10})),
            ),
        )
        .await;

        let summary = engine.set_online(true).await.unwrap().unwrap();
        assert_eq!(summary.conflicts, 1);
        let status = engine.status().await.unwrap();
        assert_eq!(status.conflict_count, 1);

        let outcome = engine
            .resolve_conflict(&op.id, ResolutionStrategy::Local, None)
            .await
            .unwrap();
        assert_eq!(outcome, ResolveOutcome::Requeued);

        let run = engine.sync().await.unwrap();
        let SyncRun::Completed(summary) = run else {
            panic!("expected a completed run");
        };
        assert_eq!(summary.synced, 1);

        let record = engine.remote().record(ResourceKind::Delivery, "d1").unwrap();
        assert_eq!(record.get("weight"), Some(&json!(15)));
    }

    #[tokio::test]
    async fn divergent_update_resolved_remote_discards() {
        let engine = test_engine();
        engine
            .remote()
            .seed(ResourceKind::Delivery, "d1", map(json!({"weight": 12})));
        engine.set_online(false).await.unwrap();

        let op = queued(
            &engine,
            LocalWrite::update(
                ResourceKind::Delivery,
                "d1",
                map(json!({"weight": 15})),
                map(json!({"weight": 10})),
            ),
        )
        .await;
        engine.set_online(true).await.unwrap();

        let outcome = engine
            .resolve_conflict(&op.id, ResolutionStrategy::Remote, None)
            .await
            .unwrap();
        assert_eq!(outcome, ResolveOutcome::Discarded);

        assert!(engine.list_queue().await.unwrap().is_empty());
        let record = engine.remote().record(ResourceKind::Delivery, "d1").unwrap();
        assert_eq!(record.get("weight"), Some(&json!(12)));
    }

    #[tokio::test]
    async fn resolving_settled_operation_is_a_noop() {
        let engine = test_engine();
        let outcome = engine
            .resolve_conflict(&OperationId::new(), ResolutionStrategy::Local, None)
            .await
            .unwrap();
        assert_eq!(outcome, ResolveOutcome::AlreadyResolved);
    }

    #[tokio::test]
    async fn update_of_remotely_deleted_record_recreates_on_local_resolution() {
        let engine = test_engine();
        engine.set_online(false).await.unwrap();

        let op = queued(
            &engine,
            LocalWrite::update(
                ResourceKind::Delivery,
                "d1",
                map(json!({"weight": 15})),
                map(json!({"weight": 10})),
            ),
        )
        .await;

        let summary = engine.set_online(true).await.unwrap().unwrap();
        assert_eq!(summary.conflicts, 1);

        engine
            .resolve_conflict(&op.id, ResolutionStrategy::Local, None)
            .await
            .unwrap();
        engine.sync().await.unwrap();

        let record = engine.remote().record(ResourceKind::Delivery, "d1").unwrap();
        assert_eq!(record.get("weight"), Some(&json!(15)));
        assert!(engine.list_queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_failures_exhaust_into_failed_then_manual_retry() {
        let engine = test_engine();
        engine.set_online(false).await.unwrap();
        let op = queued(&engine, delivery_create("d1")).await;

        for _ in 0..5 {
            engine
                .remote()
                .push_failure(RemoteError::Transient("connection reset".to_string()));
        }

        engine.set_online(true).await.unwrap();
        for _ in 0..4 {
            engine.sync().await.unwrap();
        }

        let stored = &engine.list_queue().await.unwrap()[0];
        assert_eq!(stored.status, OperationStatus::Failed);
        assert_eq!(stored.retry_count, 5);
        assert!(stored.error.as_deref().unwrap().contains("connection reset"));

        let retried = engine.retry_operation(&op.id).await.unwrap();
        assert_eq!(retried.status, OperationStatus::Pending);
        assert_eq!(retried.retry_count, 5);
        assert_eq!(retried.retry_window_base, 5);
        assert!(retried.error.is_none());

        engine.sync().await.unwrap();
        assert!(engine.list_queue().await.unwrap().is_empty());
        assert!(engine.remote().record(ResourceKind::Delivery, "d1").is_some());
    }

    #[tokio::test]
    async fn retry_rejects_operations_that_did_not_fail() {
        let engine = test_engine();
        engine.set_online(false).await.unwrap();
        let op = queued(&engine, delivery_create("d1")).await;

        let error = engine.retry_operation(&op.id).await.unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn auth_expiry_pauses_until_reauthentication() {
        let engine = test_engine();
        engine.set_online(false).await.unwrap();
        queued(&engine, delivery_create("d1")).await;

        engine
            .remote()
            .push_failure(RemoteError::AuthExpired("token expired".to_string()));
        let summary = engine.set_online(true).await.unwrap().unwrap();
        assert_eq!(summary.auth_blocked, 1);

        // paused operations are skipped by subsequent runs
        let SyncRun::Completed(summary) = engine.sync().await.unwrap() else {
            panic!("expected a completed run");
        };
        assert_eq!(summary.total, 0);
        assert_eq!(
            engine.status().await.unwrap().auth_blocked_count,
            1
        );

        assert_eq!(engine.notify_authenticated().await.unwrap(), 1);
        engine.sync().await.unwrap();
        assert!(engine.list_queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn validation_rejection_fails_without_spending_budget() {
        let engine = test_engine();
        engine.set_online(false).await.unwrap();
        queued(&engine, delivery_create("d1")).await;

        engine
            .remote()
            .push_failure(RemoteError::Validation("weight must be positive".to_string()));
        engine.set_online(true).await.unwrap();

        let stored = &engine.list_queue().await.unwrap()[0];
        assert_eq!(stored.status, OperationStatus::Failed);
        assert_eq!(stored.retry_count, 0);
        assert!(stored.error.as_deref().unwrap().contains("weight must be positive"));
    }

    #[tokio::test]
    async fn sync_trigger_coalesces_while_running() {
        let engine = test_engine();
        engine.shared.syncing.store(true, Ordering::SeqCst);

        assert_eq!(engine.sync().await.unwrap(), SyncRun::AlreadyRunning);

        engine.shared.syncing.store(false, Ordering::SeqCst);
        assert!(matches!(
            engine.sync().await.unwrap(),
            SyncRun::Completed(_)
        ));
    }

    #[tokio::test]
    async fn offline_run_interrupts_and_leaves_queue_pending() {
        let engine = test_engine();
        engine.set_online(false).await.unwrap();
        queued(&engine, delivery_create("d1")).await;

        let SyncRun::Completed(summary) = engine.sync().await.unwrap() else {
            panic!("expected a completed run");
        };
        assert!(summary.interrupted);
        assert_eq!(summary.synced, 0);
        assert_eq!(engine.status().await.unwrap().pending_count, 1);
    }

    #[tokio::test]
    async fn cancel_removes_pending_operation() {
        let engine = test_engine();
        engine.set_online(false).await.unwrap();
        let op = queued(&engine, delivery_create("d1")).await;

        engine.cancel_operation(&op.id).await.unwrap();
        assert!(engine.list_queue().await.unwrap().is_empty());

        let error = engine.cancel_operation(&op.id).await.unwrap_err();
        assert!(matches!(error, Error::OperationNotFound(_)));
    }

    #[tokio::test]
    async fn delete_of_unchanged_record_applies() {
        let engine = test_engine();
        engine
            .remote()
            .seed(ResourceKind::Delivery, "d1", map(json!({"weight": 10})));
        engine.set_online(false).await.unwrap();

        queued(
            &engine,
            LocalWrite::delete(
                ResourceKind::Delivery,
                "d1",
                Some(map(json!({"weight": 10}))),
            ),
        )
        .await;

        let summary = engine.set_online(true).await.unwrap().unwrap();
        assert_eq!(summary.synced, 1);
        assert!(engine.remote().record(ResourceKind::Delivery, "d1").is_none());
    }

    #[tokio::test]
    async fn events_reach_subscribers() {
        let engine = test_engine();
        let mut events = engine.subscribe();

        engine.set_online(false).await.unwrap();
        queued(&engine, delivery_create("d1")).await;
        engine.set_online(true).await.unwrap();

        let mut queued_seen = false;
        let mut finished_seen = false;
        while let Ok(event) = events.try_recv() {
            match event {
                SyncEvent::OperationQueued { .. } => queued_seen = true,
                SyncEvent::SyncFinished(summary) => {
                    finished_seen = true;
                    assert_eq!(summary.synced, 1);
                }
                _ => {}
            }
        }
        assert!(queued_seen);
        assert!(finished_seen);
    }
}
