//! The durable, single-writer mutation queue.

use crate::config::QueueConfig;
use crate::error::{CoreError, CoreResult};
use crate::log::{QueueLog, QueueRecord};
use crate::operation::{EntityKey, Mutation, PendingOperation};
use crate::types::{FailureKind, OperationId, OperationStatus};
use crate::validation::ValidationPolicy;
use medsync_storage::{FileBackend, StorageBackend};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

/// Error recorded on ops that were mid-call when the process stopped.
const INTERRUPTED: &str = "interrupted before the remote answered";

/// Counts of queued operations by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Waiting to be applied.
    pub pending: usize,
    /// Apply call in flight.
    pub syncing: usize,
    /// Dead-lettered or rejected.
    pub failed: usize,
}

impl QueueStats {
    /// All operations still in the queue.
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.syncing + self.failed
    }
}

/// In-memory image of the log, rebuilt by replaying it.
#[derive(Debug, Default)]
struct QueueState {
    ops: BTreeMap<u64, PendingOperation>,
    index: HashMap<OperationId, u64>,
    next_sequence: u64,
}

impl QueueState {
    fn get(&self, id: OperationId) -> Option<&PendingOperation> {
        self.index.get(&id).and_then(|seq| self.ops.get(seq))
    }

    fn get_mut(&mut self, id: OperationId) -> Option<&mut PendingOperation> {
        match self.index.get(&id) {
            Some(seq) => self.ops.get_mut(seq),
            None => None,
        }
    }

    fn syncing_for(&self, key: EntityKey) -> Option<OperationId> {
        self.ops
            .values()
            .find(|op| op.status == OperationStatus::Syncing && op.entity_key() == key)
            .map(|op| op.id)
    }

    /// Applies one record. Returns false if it names an unknown operation.
    fn apply(&mut self, record: &QueueRecord) -> bool {
        match record {
            QueueRecord::Enqueued(op) => {
                if let Some(old_seq) = self.index.insert(op.id, op.sequence) {
                    self.ops.remove(&old_seq);
                }
                self.next_sequence = self.next_sequence.max(op.sequence + 1);
                self.ops.insert(op.sequence, op.clone());
                true
            }
            QueueRecord::Removed(change) => match self.index.remove(&change.id) {
                Some(seq) => {
                    self.ops.remove(&seq);
                    true
                }
                None => false,
            },
            QueueRecord::Attempted(change) => self.update(change.id, |op| {
                op.status = OperationStatus::Syncing;
                op.sync_attempts += 1;
                op.last_attempt_at = Some(change.at);
            }),
            QueueRecord::Retrying(change) => self.update(change.id, |op| {
                op.status = OperationStatus::Pending;
                op.error_message.clone_from(&change.error);
            }),
            QueueRecord::Failed(change) => self.update(change.id, |op| {
                op.status = OperationStatus::Failed;
                op.sync_attempts = op.sync_attempts.max(change.attempts.unwrap_or(0));
                op.failure = change.failure;
                op.error_message.clone_from(&change.error);
            }),
            QueueRecord::Requeued(change) => self.update(change.id, |op| {
                op.status = OperationStatus::Pending;
                op.failure = None;
                op.error_message.clone_from(&change.error);
                op.attempt_budget_start = op.sync_attempts;
            }),
        }
    }

    fn update(&mut self, id: OperationId, f: impl FnOnce(&mut PendingOperation)) -> bool {
        match self.get_mut(id) {
            Some(op) => {
                f(op);
                true
            }
            None => false,
        }
    }
}

struct QueueInner {
    log: QueueLog,
    state: QueueState,
}

/// Durable, ordered queue of pending mutations.
///
/// All reads and writes go through one internal lock, so the queue is the
/// single writer of its log. Every method that changes state appends a
/// record and flushes it before returning; if that write fails the
/// in-memory state is left exactly as it was.
///
/// Synced operations leave the queue. Failed operations stay until the user
/// retries or dismisses them.
pub struct MutationQueue {
    inner: Mutex<QueueInner>,
    policy: ValidationPolicy,
    compact_after_records: usize,
}

impl MutationQueue {
    /// Opens a queue over `backend`, replaying whatever it already holds.
    ///
    /// Operations that were `Syncing` when the previous process stopped go
    /// back to `Pending`; re-sending them is safe because apply is
    /// idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is corrupted or cannot be read.
    pub fn open(backend: Box<dyn StorageBackend>, config: QueueConfig) -> CoreResult<Self> {
        let mut log = QueueLog::new(backend, config.sync_on_write);
        let entries = log.recover()?;

        let mut state = QueueState::default();
        for entry in &entries {
            if !state.apply(&entry.record) {
                warn!(
                    offset = entry.offset,
                    op = %entry.record.operation_id(),
                    "queue record refers to an unknown operation"
                );
            }
        }

        let interrupted: Vec<OperationId> = state
            .ops
            .values()
            .filter(|op| op.status == OperationStatus::Syncing)
            .map(|op| op.id)
            .collect();
        for id in interrupted {
            let record = QueueRecord::deferred(id, INTERRUPTED);
            log.append(&record)?;
            state.apply(&record);
        }

        info!(
            operations = state.ops.len(),
            records = entries.len(),
            "mutation queue opened"
        );

        Ok(Self {
            inner: Mutex::new(QueueInner { log, state }),
            policy: config.validation,
            compact_after_records: config.compact_after_records,
        })
    }

    /// Opens a file-backed queue, creating the file and its directories if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its log is corrupted.
    pub fn open_path(path: &Path, config: QueueConfig) -> CoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::open(Box::new(backend), config)
    }

    /// Validates and durably queues a mutation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] without touching the queue if the
    /// mutation breaks the policy, or a storage error if it could not be
    /// persisted.
    pub fn enqueue(&self, mutation: Mutation) -> CoreResult<OperationId> {
        self.policy.validate(&mutation)?;

        let mut inner = self.inner.lock();
        let id = OperationId::generate();
        let op = PendingOperation::from_mutation(id, inner.state.next_sequence, mutation);
        debug!(op = %id, entity = %op.entity_key(), kind = %op.kind, "enqueue");
        self.commit(&mut inner, QueueRecord::Enqueued(op))?;
        Ok(id)
    }

    /// Returns up to `max` `Pending` operations, oldest first.
    #[must_use]
    pub fn dequeue_batch(&self, max: usize) -> Vec<PendingOperation> {
        self.inner
            .lock()
            .state
            .ops
            .values()
            .filter(|op| op.is_pending())
            .take(max)
            .cloned()
            .collect()
    }

    /// Records the start of an apply attempt and returns the updated op.
    ///
    /// # Errors
    ///
    /// Fails if the op is not `Pending`, if another op for the same entity
    /// is already `Syncing`, or if the record cannot be persisted.
    pub fn mark_syncing(&self, id: OperationId) -> CoreResult<PendingOperation> {
        let mut inner = self.inner.lock();
        let op = Self::require(&inner, id, &[OperationStatus::Pending], OperationStatus::Syncing)?;
        if let Some(in_flight) = inner.state.syncing_for(op.entity_key()) {
            return Err(CoreError::EntityBusy { id, in_flight });
        }

        self.commit(&mut inner, QueueRecord::attempted(id))?;
        inner
            .state
            .get(id)
            .cloned()
            .ok_or(CoreError::OperationNotFound { id })
    }

    /// Marks an op as applied, which removes it from the queue.
    ///
    /// # Errors
    ///
    /// Fails if the op is unknown or the record cannot be persisted.
    pub fn mark_synced(&self, id: OperationId) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        Self::require(
            &inner,
            id,
            &[
                OperationStatus::Pending,
                OperationStatus::Syncing,
                OperationStatus::Failed,
            ],
            OperationStatus::Synced,
        )?;
        debug!(op = %id, "synced");
        self.commit(&mut inner, QueueRecord::removed(id))
    }

    /// Returns a `Syncing` op to `Pending` after a transient failure.
    ///
    /// # Errors
    ///
    /// Fails if the op is not `Syncing` or the record cannot be persisted.
    pub fn mark_retrying(&self, id: OperationId, error: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        Self::require(&inner, id, &[OperationStatus::Syncing], OperationStatus::Pending)?;
        self.commit(&mut inner, QueueRecord::retrying(id, error))
    }

    /// Returns a `Syncing` op to `Pending` with a fresh attempt budget.
    ///
    /// Used when the attempt ended for reasons outside the op, such as
    /// rejected credentials or an interrupted drain, so it does not count
    /// toward dead-lettering.
    ///
    /// # Errors
    ///
    /// Fails if the op is not `Syncing` or the record cannot be persisted.
    pub fn mark_deferred(&self, id: OperationId, error: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        Self::require(&inner, id, &[OperationStatus::Syncing], OperationStatus::Pending)?;
        self.commit(&mut inner, QueueRecord::deferred(id, error))
    }

    /// Marks an op as permanently failed.
    ///
    /// `attempts` is recorded as the op's total; the stored count never
    /// goes down.
    ///
    /// # Errors
    ///
    /// Fails if the op is neither `Syncing` nor `Pending`, or the record
    /// cannot be persisted.
    pub fn mark_failed(
        &self,
        id: OperationId,
        attempts: u32,
        failure: FailureKind,
        error: &str,
    ) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        Self::require(
            &inner,
            id,
            &[OperationStatus::Syncing, OperationStatus::Pending],
            OperationStatus::Failed,
        )?;
        warn!(op = %id, attempts, %failure, error, "operation failed");
        self.commit(&mut inner, QueueRecord::failed(id, attempts, failure, error))
    }

    /// Readmits a failed op to automatic retry with a fresh attempt budget.
    ///
    /// # Errors
    ///
    /// Fails if the op is not `Failed` or the record cannot be persisted.
    pub fn retry(&self, id: OperationId) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        Self::require(&inner, id, &[OperationStatus::Failed], OperationStatus::Pending)?;
        self.commit(&mut inner, QueueRecord::requeued(id))
    }

    /// Readmits every failed op. Returns how many were readmitted.
    ///
    /// # Errors
    ///
    /// Fails on the first record that cannot be persisted; ops readmitted
    /// before it stay readmitted.
    pub fn retry_all(&self) -> CoreResult<usize> {
        let mut inner = self.inner.lock();
        let failed: Vec<OperationId> = inner
            .state
            .ops
            .values()
            .filter(|op| op.is_failed())
            .map(|op| op.id)
            .collect();
        for id in &failed {
            self.commit(&mut inner, QueueRecord::requeued(*id))?;
        }
        Ok(failed.len())
    }

    /// Removes a failed op at the user's request.
    ///
    /// # Errors
    ///
    /// Fails if the op is not `Failed` or the record cannot be persisted.
    pub fn dismiss(&self, id: OperationId) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        Self::require(&inner, id, &[OperationStatus::Failed], OperationStatus::Synced)?;
        info!(op = %id, "failed operation dismissed");
        self.commit(&mut inner, QueueRecord::removed(id))
    }

    /// Snapshot of every queued op in enqueue order.
    #[must_use]
    pub fn list(&self) -> Vec<PendingOperation> {
        self.inner.lock().state.ops.values().cloned().collect()
    }

    /// Looks up one op.
    #[must_use]
    pub fn get(&self, id: OperationId) -> Option<PendingOperation> {
        self.inner.lock().state.get(id).cloned()
    }

    /// Number of ops in the queue, any status.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().state.ops.len()
    }

    /// Returns true if the queue holds no ops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counts ops by status.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        let mut stats = QueueStats::default();
        for op in inner.state.ops.values() {
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::Syncing => stats.syncing += 1,
                OperationStatus::Failed => stats.failed += 1,
                OperationStatus::Synced => {}
            }
        }
        stats
    }

    /// Size of the underlying log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn log_size(&self) -> CoreResult<u64> {
        self.inner.lock().log.size()
    }

    /// Rewrites the log as one snapshot record per live op.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written; the old log is
    /// then still in place.
    pub fn compact(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        Self::compact_locked(&mut inner)
    }

    fn compact_locked(inner: &mut QueueInner) -> CoreResult<()> {
        let snapshot: Vec<QueueRecord> = inner
            .state
            .ops
            .values()
            .cloned()
            .map(QueueRecord::Enqueued)
            .collect();
        inner.log.rewrite(&snapshot)?;
        debug!(operations = snapshot.len(), "queue log compacted");
        Ok(())
    }

    fn require(
        inner: &QueueInner,
        id: OperationId,
        allowed: &[OperationStatus],
        to: OperationStatus,
    ) -> CoreResult<PendingOperation> {
        let op = inner
            .state
            .get(id)
            .ok_or(CoreError::OperationNotFound { id })?;
        if !allowed.contains(&op.status) {
            return Err(CoreError::InvalidTransition {
                id,
                from: op.status,
                to,
            });
        }
        Ok(op.clone())
    }

    fn commit(&self, inner: &mut QueueInner, record: QueueRecord) -> CoreResult<()> {
        inner.log.append(&record)?;
        inner.state.apply(&record);

        // The record is already durable; a failed compaction only costs space.
        let since = inner.log.records_since_compaction();
        let live = inner.state.ops.len();
        let due = (live == 0 && since > 0)
            || (self.compact_after_records > 0
                && since >= self.compact_after_records
                && since > live * 2);
        if due {
            if let Err(e) = Self::compact_locked(inner) {
                warn!(error = %e, "queue log compaction failed");
            }
        }
        Ok(())
    }
}
