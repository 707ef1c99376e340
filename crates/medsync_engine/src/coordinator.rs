//! Sync coordinator.
//!
//! Drains the mutation queue through a [`RemoteAdapter`]:
//!
//! ```text
//! Idle ──trigger──▶ Draining ──▶ Idle
//!                      │
//!                 auth failure
//!                      ▼
//!                   Paused ──resume──▶ Idle
//! ```
//!
//! Each drain plans per-entity chains (see [`crate::plan`]) and runs them
//! as tasks. Chains for different entities run concurrently up to the
//! configured number of permits; ops within a chain run strictly in order.

use crate::adapter::RemoteAdapter;
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, Subscription};
use crate::error::{ApplyError, SyncError, SyncResult};
use crate::plan::{self, EntityChain};
use crate::status::StatusReporter;
use medsync_core::{FailureKind, MutationQueue, OperationId, OperationStatus, PendingOperation};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Run state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No drain running.
    Idle,
    /// A drain is running.
    Draining,
    /// Waiting for re-authentication.
    Paused,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Draining => write!(f, "draining"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// What a call to [`SyncCoordinator::trigger`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// A drain ran to completion.
    Completed(DrainReport),
    /// Another drain was already running; nothing was done.
    AlreadyRunning,
    /// Offline; nothing was done.
    Offline,
    /// Paused until [`SyncCoordinator::resume`]; nothing was done.
    Paused,
}

/// Summary of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Ops the drain set out to handle.
    pub total: usize,
    /// Ops applied remotely and removed from the queue.
    pub synced: usize,
    /// Superseded ops removed without a remote call.
    pub resolved_locally: usize,
    /// Transient failures that were retried.
    pub retries: usize,
    /// Ops that became `Failed`.
    pub failed: usize,
    /// Ops left `Pending` (blocked, paused, or offline).
    pub deferred: usize,
    /// Whether the drain ended in the paused state.
    pub paused: bool,
}

impl DrainReport {
    fn absorb(&mut self, chain: ChainOutcome) {
        self.synced += chain.synced;
        self.retries += chain.retries;
        self.failed += chain.failed;
        self.deferred += chain.deferred;
    }
}

#[derive(Debug, Default)]
struct ChainOutcome {
    synced: usize,
    retries: usize,
    failed: usize,
    deferred: usize,
}

enum Step {
    Synced,
    Failed,
    Stopped,
}

struct Inner<A> {
    queue: Arc<MutationQueue>,
    adapter: Arc<A>,
    connectivity: ConnectivityMonitor,
    status: StatusReporter,
    config: SyncConfig,
    permits: Semaphore,
    draining: AtomicBool,
    paused: RwLock<Option<String>>,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl<A: RemoteAdapter> Inner<A> {
    fn is_paused(&self) -> bool {
        self.paused.read().is_some()
    }

    fn may_attempt(&self) -> bool {
        !self.is_paused() && self.connectivity.is_online()
    }

    fn pause(&self, reason: &str) {
        {
            let mut paused = self.paused.write();
            if paused.is_some() {
                return;
            }
            *paused = Some(reason.to_string());
        }
        warn!(reason, "remote rejected credentials, sync paused");
        self.status.set_paused(Some(reason.to_string()));
    }
}

/// Releases the drain flag and closes the status session, even if the
/// drain future is dropped.
struct DrainGuard<'a, A: RemoteAdapter> {
    inner: &'a Inner<A>,
}

impl<'a, A: RemoteAdapter> DrainGuard<'a, A> {
    fn acquire(inner: &'a Inner<A>) -> Option<Self> {
        inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { inner })
    }
}

impl<A: RemoteAdapter> Drop for DrainGuard<'_, A> {
    fn drop(&mut self) {
        self.inner.status.end_drain();
        self.inner.draining.store(false, Ordering::Release);
    }
}

/// Drains the mutation queue when online.
///
/// Cloning yields another handle to the same coordinator.
pub struct SyncCoordinator<A: RemoteAdapter> {
    inner: Arc<Inner<A>>,
}

impl<A: RemoteAdapter> Clone for SyncCoordinator<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: RemoteAdapter> SyncCoordinator<A> {
    /// Creates a coordinator.
    pub fn new(
        queue: Arc<MutationQueue>,
        adapter: A,
        connectivity: ConnectivityMonitor,
        config: SyncConfig,
    ) -> Self {
        let status = StatusReporter::new(Arc::clone(&queue), connectivity.clone());
        Self {
            inner: Arc::new(Inner {
                queue,
                adapter: Arc::new(adapter),
                connectivity,
                status,
                permits: Semaphore::new(config.concurrency.max(1)),
                config,
                draining: AtomicBool::new(false),
                paused: RwLock::new(None),
                sweep: Mutex::new(None),
            }),
        }
    }

    /// Current run state.
    pub fn state(&self) -> CoordinatorState {
        if self.inner.draining.load(Ordering::Acquire) {
            CoordinatorState::Draining
        } else if self.inner.is_paused() {
            CoordinatorState::Paused
        } else {
            CoordinatorState::Idle
        }
    }

    /// Returns true if draining waits for re-authentication.
    pub fn is_paused(&self) -> bool {
        self.inner.is_paused()
    }

    /// The queue being drained.
    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.inner.queue
    }

    /// The remote adapter.
    pub fn adapter(&self) -> &A {
        &self.inner.adapter
    }

    /// The connectivity monitor.
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// The status reporter.
    pub fn status(&self) -> &StatusReporter {
        &self.inner.status
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Starts a drain unless one is running, the device is offline, or
    /// sync is paused.
    ///
    /// Connectivity events, manual refresh and the periodic sweep all come
    /// through here.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue could not record a transition. Ops
    /// already handled keep their new state.
    pub async fn trigger(&self) -> SyncResult<DrainOutcome> {
        if self.inner.is_paused() {
            debug!("trigger ignored, sync paused");
            return Ok(DrainOutcome::Paused);
        }
        if !self.inner.connectivity.is_online() {
            debug!("trigger ignored, offline");
            return Ok(DrainOutcome::Offline);
        }
        let Some(guard) = DrainGuard::acquire(&self.inner) else {
            debug!("trigger ignored, drain already running");
            return Ok(DrainOutcome::AlreadyRunning);
        };

        self.cancel_sweep();
        let started = Instant::now();
        let result = self.drain().await;
        drop(guard);

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                self.schedule_sweep();
                return Err(e);
            }
        };
        info!(
            total = report.total,
            synced = report.synced,
            resolved_locally = report.resolved_locally,
            retries = report.retries,
            failed = report.failed,
            deferred = report.deferred,
            paused = report.paused,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "drain finished"
        );
        self.schedule_sweep();
        Ok(DrainOutcome::Completed(report))
    }

    /// Clears the paused state after re-authentication.
    ///
    /// Does not start a drain; call [`SyncCoordinator::trigger`] for that.
    pub fn resume(&self) {
        if self.inner.paused.write().take().is_some() {
            info!("sync resumed");
            self.inner.status.set_paused(None);
        }
    }

    /// Readmits one failed op to automatic retry.
    ///
    /// # Errors
    ///
    /// Fails if the op is not `Failed` or cannot be updated.
    pub fn retry(&self, id: OperationId) -> SyncResult<()> {
        self.inner.queue.retry(id)?;
        self.inner.status.publish();
        Ok(())
    }

    /// Readmits every failed op. Returns how many were readmitted.
    ///
    /// # Errors
    ///
    /// Fails if the queue cannot be updated.
    pub fn retry_all(&self) -> SyncResult<usize> {
        let count = self.inner.queue.retry_all()?;
        self.inner.status.publish();
        Ok(count)
    }

    /// Removes a failed op at the user's request.
    ///
    /// # Errors
    ///
    /// Fails if the op is not `Failed` or cannot be removed.
    pub fn dismiss(&self, id: OperationId) -> SyncResult<()> {
        self.inner.queue.dismiss(id)?;
        self.inner.status.publish();
        Ok(())
    }

    /// Triggers a drain whenever the monitor reports a stable transition
    /// to online.
    ///
    /// The coordinator stays registered until the returned subscription is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] outside a tokio runtime.
    pub fn attach(&self) -> SyncResult<Subscription> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let this = self.clone();
        Ok(self.inner.connectivity.subscribe(
            move || {
                let this = this.clone();
                handle.spawn(async move {
                    if let Err(e) = this.trigger().await {
                        warn!(error = %e, "drain after reconnect failed");
                    }
                });
            },
            || debug!("went offline, no new attempts will start"),
        ))
    }

    /// Returns true if a follow-up sweep is waiting to run.
    pub fn sweep_scheduled(&self) -> bool {
        self.inner
            .sweep
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn cancel_sweep(&self) {
        if let Some(handle) = self.inner.sweep.lock().take() {
            handle.abort();
        }
    }

    fn schedule_sweep(&self) {
        let Some(interval) = self.inner.config.sweep_interval else {
            return;
        };
        if !self.inner.may_attempt() {
            return;
        }
        let pending = self.inner.queue.stats().pending;
        if pending == 0 {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let mut slot = self.inner.sweep.lock();
        if let Some(old) = slot.take() {
            old.abort();
        }
        let this = self.clone();
        *slot = Some(handle.spawn(async move {
            tokio::time::sleep(interval).await;
            // Detach first so the drain does not abort its own task.
            drop(this.inner.sweep.lock().take());
            match this.trigger().await {
                Ok(outcome) => debug!(?outcome, "sweep finished"),
                Err(e) => warn!(error = %e, "sweep failed"),
            }
        }));
        debug!(?interval, pending, "sweep scheduled");
    }

    async fn drain(&self) -> SyncResult<DrainReport> {
        let inner = &self.inner;

        // Drains are exclusive, so anything still Syncing was cut off.
        for op in inner.queue.list() {
            if op.status == OperationStatus::Syncing {
                inner.queue.mark_deferred(op.id, "drain interrupted")?;
            }
        }

        let plan = plan::plan(&inner.queue.list());
        let mut report = DrainReport {
            total: plan.total(),
            deferred: plan.blocked,
            ..DrainReport::default()
        };
        inner.status.begin_drain(report.total);
        info!(
            total = report.total,
            entities = plan.chains.len(),
            blocked = plan.blocked,
            "drain started"
        );

        for op in &plan.resolved_locally {
            inner.queue.mark_synced(op.id)?;
            debug!(op = %op.id, entity = %op.entity_key(), kind = %op.kind, "superseded, resolved locally");
            report.resolved_locally += 1;
            inner.status.op_finished();
        }

        let mut tasks = JoinSet::new();
        for chain in plan.chains {
            tasks.spawn(run_chain(Arc::clone(inner), chain));
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => report.absorb(outcome),
                Ok(Err(e)) => {
                    warn!(error = %e, "entity chain stopped");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    warn!(error = %e, "entity task failed");
                    first_error.get_or_insert(SyncError::Task(e.to_string()));
                }
            }
        }

        report.paused = inner.is_paused();
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

impl<A: RemoteAdapter> std::fmt::Debug for SyncCoordinator<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

async fn run_chain<A: RemoteAdapter>(
    inner: Arc<Inner<A>>,
    chain: EntityChain,
) -> SyncResult<ChainOutcome> {
    let mut outcome = ChainOutcome::default();
    let len = chain.ops.len();

    for (index, op) in chain.ops.iter().enumerate() {
        match apply_with_retry(&inner, op, &mut outcome).await? {
            Step::Synced => {
                outcome.synced += 1;
                inner.status.op_finished();
            }
            Step::Failed => {
                outcome.failed += 1;
                outcome.deferred += len - index - 1;
                inner.status.op_finished();
                break;
            }
            Step::Stopped => {
                outcome.deferred += len - index;
                break;
            }
        }
    }

    if outcome.deferred > 0 {
        debug!(entity = %chain.entity, deferred = outcome.deferred, "entity chain left work queued");
    }
    Ok(outcome)
}

async fn apply_with_retry<A: RemoteAdapter>(
    inner: &Inner<A>,
    op: &PendingOperation,
    outcome: &mut ChainOutcome,
) -> SyncResult<Step> {
    let retry = &inner.config.retry;

    loop {
        if !inner.may_attempt() {
            return Ok(Step::Stopped);
        }
        let permit = inner
            .permits
            .acquire()
            .await
            .map_err(|_| SyncError::Cancelled)?;
        if !inner.may_attempt() {
            return Ok(Step::Stopped);
        }

        let current = inner.queue.mark_syncing(op.id)?;
        debug!(op = %op.id, entity = %op.entity_key(), kind = %op.kind, attempt = current.sync_attempts, "applying");

        let result = match tokio::time::timeout(inner.config.timeout, inner.adapter.apply(&current)).await {
            Ok(result) => result,
            Err(_) => Err(ApplyError::timeout(inner.config.timeout)),
        };
        drop(permit);

        let error = match result {
            Ok(()) => {
                inner.queue.mark_synced(op.id)?;
                debug!(op = %op.id, attempts = current.sync_attempts, "synced");
                return Ok(Step::Synced);
            }
            Err(error) => error,
        };

        match error.kind {
            FailureKind::Transient => {
                let used = current.attempts_in_budget();
                if used >= retry.max_attempts {
                    let message = format!("gave up after {used} attempts: {}", error.message);
                    inner.queue.mark_failed(
                        op.id,
                        current.sync_attempts,
                        FailureKind::Transient,
                        &message,
                    )?;
                    return Ok(Step::Failed);
                }

                inner.queue.mark_retrying(op.id, &error.message)?;
                outcome.retries += 1;
                inner.status.publish();

                let delay = retry.delay_for_attempt(used);
                debug!(op = %op.id, attempt = current.sync_attempts, ?delay, error = %error.message, "transient failure, backing off");
                tokio::time::sleep(delay).await;
            }
            FailureKind::Auth => {
                inner.queue.mark_deferred(op.id, &error.message)?;
                inner.pause(&error.message);
                return Ok(Step::Stopped);
            }
            FailureKind::Conflict | FailureKind::Quota | FailureKind::Validation => {
                inner.queue.mark_failed(
                    op.id,
                    current.sync_attempts,
                    error.kind,
                    &error.message,
                )?;
                return Ok(Step::Failed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryRemote;
    use crate::config::RetryConfig;
    use medsync_core::{EntityType, Mutation, Payload, QueueConfig};
    use medsync_storage::InMemoryBackend;
    use std::collections::HashMap;
    use std::time::Duration;

    fn queue() -> Arc<MutationQueue> {
        Arc::new(
            MutationQueue::open(Box::new(InMemoryBackend::new()), QueueConfig::default()).unwrap(),
        )
    }

    fn fast_config() -> SyncConfig {
        SyncConfig::new()
            .without_sweep()
            .with_debounce(Duration::ZERO)
            .with_timeout(Duration::from_millis(200))
            .with_retry(
                RetryConfig::new(3)
                    .with_base_delay(Duration::from_millis(1))
                    .with_max_delay(Duration::from_millis(5)),
            )
    }

    fn create(bytes: &[u8]) -> Mutation {
        Mutation::create(EntityType::HealthRecord, Payload::new(bytes.to_vec()))
    }

    /// Fails each op with a fixed error, or succeeds if none is set.
    #[derive(Default)]
    struct Rejecting {
        errors: parking_lot::Mutex<HashMap<OperationId, ApplyError>>,
        remote: MemoryRemote,
    }

    impl RemoteAdapter for Rejecting {
        async fn apply(&self, op: &PendingOperation) -> Result<(), ApplyError> {
            if let Some(error) = self.errors.lock().get(&op.id).cloned() {
                return Err(error);
            }
            self.remote.apply_now(op);
            Ok(())
        }
    }

    fn completed(outcome: DrainOutcome) -> DrainReport {
        match outcome {
            DrainOutcome::Completed(report) => report,
            other => panic!("expected a completed drain, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_trigger_is_noop() {
        let queue = queue();
        queue.enqueue(create(b"a")).unwrap();
        let monitor = ConnectivityMonitor::new(false, Duration::ZERO);
        let coordinator = SyncCoordinator::new(queue, MemoryRemote::new(), monitor, fast_config());

        assert_eq!(coordinator.trigger().await.unwrap(), DrainOutcome::Offline);
        assert_eq!(coordinator.adapter().call_count(), 0);
        assert_eq!(coordinator.queue().len(), 1);
    }

    #[tokio::test]
    async fn drain_applies_everything() {
        let queue = queue();
        for i in 0..5u8 {
            queue.enqueue(create(&[i])).unwrap();
        }
        let monitor = ConnectivityMonitor::new(true, Duration::ZERO);
        let coordinator = SyncCoordinator::new(queue, MemoryRemote::new(), monitor, fast_config());

        let report = completed(coordinator.trigger().await.unwrap());
        assert_eq!(report.total, 5);
        assert_eq!(report.synced, 5);
        assert!(coordinator.queue().is_empty());
        assert_eq!(coordinator.adapter().len(), 5);
        assert_eq!(coordinator.state(), CoordinatorState::Idle);

        let status = coordinator.status().snapshot();
        assert_eq!(status.pending_items, 0);
        assert_eq!(status.sync_progress_percent, 100);
        assert!(status.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn permanent_failure_is_kept_for_review() {
        let queue = queue();
        let bad = queue.enqueue(create(b"bad")).unwrap();
        let good = queue.enqueue(create(b"good")).unwrap();
        let adapter = Rejecting::default();
        adapter
            .errors
            .lock()
            .insert(bad, ApplyError::conflict("stale version"));

        let monitor = ConnectivityMonitor::new(true, Duration::ZERO);
        let coordinator = SyncCoordinator::new(queue, adapter, monitor, fast_config());
        let report = completed(coordinator.trigger().await.unwrap());

        assert_eq!(report.failed, 1);
        assert_eq!(report.synced, 1);
        assert_eq!(report.retries, 0);
        let op = coordinator.queue().get(bad).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.failure, Some(FailureKind::Conflict));
        assert_eq!(op.sync_attempts, 1);
        assert!(coordinator.queue().get(good).is_none());
    }

    #[tokio::test]
    async fn auth_failure_pauses_until_resume() {
        let queue = queue();
        let id = queue.enqueue(create(b"a")).unwrap();
        let adapter = Rejecting::default();
        adapter
            .errors
            .lock()
            .insert(id, ApplyError::auth("token expired"));

        let monitor = ConnectivityMonitor::new(true, Duration::ZERO);
        let coordinator = SyncCoordinator::new(queue, adapter, monitor, fast_config());

        let report = completed(coordinator.trigger().await.unwrap());
        assert!(report.paused);
        assert_eq!(report.deferred, 1);
        assert_eq!(coordinator.state(), CoordinatorState::Paused);
        assert_eq!(coordinator.trigger().await.unwrap(), DrainOutcome::Paused);

        let op = coordinator.queue().get(id).unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert!(coordinator.status().snapshot().paused);

        coordinator.adapter().errors.lock().clear();
        coordinator.resume();
        let report = completed(coordinator.trigger().await.unwrap());
        assert_eq!(report.synced, 1);
        assert!(coordinator.queue().is_empty());
    }

    #[tokio::test]
    async fn auth_pauses_do_not_use_up_retry_budget() {
        let queue = queue();
        let id = queue.enqueue(create(b"a")).unwrap();
        let adapter = Rejecting::default();
        let monitor = ConnectivityMonitor::new(true, Duration::ZERO);
        let coordinator = SyncCoordinator::new(queue, adapter, monitor, fast_config());

        for _ in 0..3 {
            coordinator
                .adapter()
                .errors
                .lock()
                .insert(id, ApplyError::auth("token expired"));
            let report = completed(coordinator.trigger().await.unwrap());
            assert!(report.paused);
            coordinator.resume();
        }
        let op = coordinator.queue().get(id).unwrap();
        assert_eq!(op.sync_attempts, 3);
        assert_eq!(op.attempts_in_budget(), 0);

        coordinator
            .adapter()
            .errors
            .lock()
            .insert(id, ApplyError::transient("connection reset"));
        let report = completed(coordinator.trigger().await.unwrap());
        assert_eq!(report.retries, 2);
        assert_eq!(report.failed, 1);
        let op = coordinator.queue().get(id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.sync_attempts, 6);
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_and_user_retry_restores() {
        let queue = queue();
        let id = queue.enqueue(create(b"a")).unwrap();
        let adapter = Rejecting::default();
        adapter
            .errors
            .lock()
            .insert(id, ApplyError::transient("503"));

        let monitor = ConnectivityMonitor::new(true, Duration::ZERO);
        let coordinator = SyncCoordinator::new(queue, adapter, monitor, fast_config());

        let report = completed(coordinator.trigger().await.unwrap());
        assert_eq!(report.failed, 1);
        assert_eq!(report.retries, 2);
        let op = coordinator.queue().get(id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.sync_attempts, 3);
        assert_eq!(op.failure, Some(FailureKind::Transient));

        coordinator.adapter().errors.lock().clear();
        assert_eq!(coordinator.retry_all().unwrap(), 1);
        let report = completed(coordinator.trigger().await.unwrap());
        assert_eq!(report.synced, 1);
        assert!(coordinator.queue().is_empty());
    }

    #[tokio::test]
    async fn slow_remote_times_out_as_transient() {
        struct Slow;
        impl RemoteAdapter for Slow {
            async fn apply(&self, _op: &PendingOperation) -> Result<(), ApplyError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        }

        let queue = queue();
        let id = queue.enqueue(create(b"a")).unwrap();
        let monitor = ConnectivityMonitor::new(true, Duration::ZERO);
        let config = fast_config()
            .with_timeout(Duration::from_millis(10))
            .with_retry(RetryConfig::new(1));
        let coordinator = SyncCoordinator::new(queue, Slow, monitor, config);

        let report = completed(coordinator.trigger().await.unwrap());
        assert_eq!(report.failed, 1);
        let op = coordinator.queue().get(id).unwrap();
        assert!(op.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn stale_syncing_ops_are_reset_before_planning() {
        let queue = queue();
        let id = queue.enqueue(create(b"a")).unwrap();
        queue.mark_syncing(id).unwrap();

        let monitor = ConnectivityMonitor::new(true, Duration::ZERO);
        let coordinator = SyncCoordinator::new(queue, MemoryRemote::new(), monitor, fast_config());
        let report = completed(coordinator.trigger().await.unwrap());
        assert_eq!(report.synced, 1);
        assert_eq!(coordinator.adapter().calls()[0].op_id, id);
    }

    #[tokio::test]
    async fn sweep_is_scheduled_when_work_remains() {
        let queue = queue();
        let stuck = queue.enqueue(create(b"a")).unwrap();
        let adapter = Rejecting::default();
        adapter
            .errors
            .lock()
            .insert(stuck, ApplyError::conflict("no"));
        let id = queue.enqueue(Mutation::update(
            EntityType::HealthRecord,
            stuck.into(),
            Payload::empty(),
        ))
        .unwrap();

        let monitor = ConnectivityMonitor::new(true, Duration::ZERO);
        let config = fast_config().with_sweep_interval(Duration::from_secs(60));
        let coordinator = SyncCoordinator::new(queue, adapter, monitor, config);

        let report = completed(coordinator.trigger().await.unwrap());
        assert_eq!(report.deferred, 1);
        assert!(coordinator.queue().get(id).unwrap().is_pending());
        assert!(coordinator.sweep_scheduled());

        coordinator.cancel_sweep();
        assert!(!coordinator.sweep_scheduled());
    }

    #[tokio::test]
    async fn sweep_drains_work_queued_during_a_drain() {
        /// Applies every op after a short delay.
        #[derive(Default)]
        struct Lagging {
            remote: MemoryRemote,
        }

        impl RemoteAdapter for Lagging {
            async fn apply(&self, op: &PendingOperation) -> Result<(), ApplyError> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.remote.apply_now(op);
                Ok(())
            }
        }

        let queue = queue();
        queue.enqueue(create(b"first")).unwrap();
        let monitor = ConnectivityMonitor::new(true, Duration::ZERO);
        let config = fast_config().with_sweep_interval(Duration::from_millis(20));
        let coordinator = SyncCoordinator::new(queue, Lagging::default(), monitor, config);

        let running = coordinator.clone();
        let drain = tokio::spawn(async move { running.trigger().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let late = coordinator.queue().enqueue(create(b"late")).unwrap();

        let report = completed(drain.await.unwrap().unwrap());
        assert_eq!(report.synced, 1);
        assert!(coordinator.queue().get(late).unwrap().is_pending());
        assert!(coordinator.sweep_scheduled());

        for _ in 0..100 {
            if coordinator.queue().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(coordinator.queue().is_empty());
        assert_eq!(coordinator.adapter().remote.call_count(), 2);
        assert!(!coordinator.sweep_scheduled());
    }

    #[tokio::test]
    async fn attach_drains_on_reconnect() {
        let queue = queue();
        queue.enqueue(create(b"a")).unwrap();
        let monitor = ConnectivityMonitor::new(false, Duration::ZERO);
        let coordinator =
            SyncCoordinator::new(queue, MemoryRemote::new(), monitor.clone(), fast_config());
        let _subscription = coordinator.attach().unwrap();

        monitor.report(true);
        for _ in 0..100 {
            if coordinator.queue().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(coordinator.queue().is_empty());
        assert_eq!(coordinator.adapter().call_count(), 1);
    }
}
