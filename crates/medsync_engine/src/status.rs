//! Read-only sync status for external consumers.

use crate::connectivity::ConnectivityMonitor;
use medsync_core::{
    EntityKey, FailureKind, MutationQueue, OperationId, OperationKind, OperationStatus, Timestamp,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Aggregate status of the queue and the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Ops waiting to be applied (Pending or Syncing).
    pub pending_items: usize,
    /// Whether a drain is running.
    pub is_syncing: bool,
    /// Progress of the current drain, or of the last one when idle.
    pub sync_progress_percent: u8,
    /// When the last drain finished.
    pub last_sync_at: Option<Timestamp>,
    /// User-facing errors: failed ops and the pause reason, if any.
    pub errors: Vec<String>,
    /// Last stable connectivity state.
    pub is_online: bool,
    /// Whether draining is paused until re-authentication.
    pub paused: bool,
}

/// Per-item badge for one queued op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemStatus {
    /// The op.
    pub id: OperationId,
    /// Target entity.
    pub entity: EntityKey,
    /// Create, update or delete.
    pub kind: OperationKind,
    /// Badge to show.
    pub status: OperationStatus,
    /// Attempts made so far.
    pub sync_attempts: u32,
    /// Failure class, for failed ops.
    pub failure: Option<FailureKind>,
    /// Last error, if any.
    pub error: Option<String>,
}

/// One finished drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncSession {
    /// Ops that reached an outcome in this drain.
    pub processed: usize,
    /// Ops the drain set out to handle.
    pub total: usize,
    /// Drain start.
    pub started_at: Timestamp,
    /// Drain end, once finished.
    pub ended_at: Option<Timestamp>,
}

impl SyncSession {
    fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let done = self.processed.min(self.total);
        u8::try_from(done * 100 / self.total).unwrap_or(100)
    }
}

#[derive(Debug, Default)]
struct Progress {
    current: Option<SyncSession>,
    last: Option<SyncSession>,
    paused: Option<String>,
}

/// Projects queue and coordinator state into [`SyncStatus`].
///
/// Cloning yields another handle to the same reporter.
#[derive(Clone)]
pub struct StatusReporter {
    queue: Arc<MutationQueue>,
    connectivity: ConnectivityMonitor,
    progress: Arc<RwLock<Progress>>,
    tx: Arc<watch::Sender<SyncStatus>>,
}

impl StatusReporter {
    /// Creates a reporter over `queue`.
    pub fn new(queue: Arc<MutationQueue>, connectivity: ConnectivityMonitor) -> Self {
        let progress = Arc::new(RwLock::new(Progress::default()));
        let initial = compute(&queue, &connectivity, &progress.read());
        let (tx, _rx) = watch::channel(initial);
        Self {
            queue,
            connectivity,
            progress,
            tx: Arc::new(tx),
        }
    }

    /// Computes the current status.
    pub fn snapshot(&self) -> SyncStatus {
        compute(&self.queue, &self.connectivity, &self.progress.read())
    }

    /// Badges for every queued op, in enqueue order.
    pub fn items(&self) -> Vec<ItemStatus> {
        self.queue
            .list()
            .into_iter()
            .map(|op| ItemStatus {
                id: op.id,
                entity: op.entity_key(),
                kind: op.kind,
                status: op.status,
                sync_attempts: op.sync_attempts,
                failure: op.failure,
                error: op.error_message,
            })
            .collect()
    }

    /// Receiver updated on every progress event.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    /// The last finished drain.
    pub fn last_session(&self) -> Option<SyncSession> {
        self.progress.read().last
    }

    /// Recomputes and publishes the status.
    pub fn publish(&self) {
        self.tx.send_replace(self.snapshot());
    }

    pub(crate) fn begin_drain(&self, total: usize) {
        self.progress.write().current = Some(SyncSession {
            processed: 0,
            total,
            started_at: Timestamp::now(),
            ended_at: None,
        });
        self.publish();
    }

    pub(crate) fn op_finished(&self) {
        if let Some(session) = self.progress.write().current.as_mut() {
            session.processed += 1;
        }
        self.publish();
    }

    pub(crate) fn end_drain(&self) -> Option<SyncSession> {
        let finished = {
            let mut progress = self.progress.write();
            let finished = progress.current.take().map(|mut s| {
                s.ended_at = Some(Timestamp::now());
                s
            });
            if finished.is_some() {
                progress.last = finished;
            }
            finished
        };
        self.publish();
        finished
    }

    pub(crate) fn set_paused(&self, reason: Option<String>) {
        self.progress.write().paused = reason;
        self.publish();
    }
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter")
            .field("status", &self.snapshot())
            .finish_non_exhaustive()
    }
}

fn compute(
    queue: &MutationQueue,
    connectivity: &ConnectivityMonitor,
    progress: &Progress,
) -> SyncStatus {
    let ops = queue.list();
    let pending_items = ops
        .iter()
        .filter(|op| matches!(op.status, OperationStatus::Pending | OperationStatus::Syncing))
        .count();

    let mut errors: Vec<String> = ops
        .iter()
        .filter(|op| op.is_failed())
        .map(|op| {
            let failure = op.failure.map_or("unknown", FailureKind::as_str);
            match &op.error_message {
                Some(message) => format!("{} {} ({failure}): {message}", op.kind, op.entity_key()),
                None => format!("{} {} ({failure})", op.kind, op.entity_key()),
            }
        })
        .collect();
    if let Some(reason) = &progress.paused {
        errors.push(format!("authentication required: {reason}"));
    }

    let sync_progress_percent = match (progress.current, progress.last) {
        (Some(session), _) | (None, Some(session)) => session.percent(),
        (None, None) if pending_items > 0 => 0,
        (None, None) => 100,
    };

    SyncStatus {
        pending_items,
        is_syncing: progress.current.is_some(),
        sync_progress_percent,
        last_sync_at: progress.last.and_then(|s| s.ended_at),
        errors,
        is_online: connectivity.is_online(),
        paused: progress.paused.is_some(),
    }
}
