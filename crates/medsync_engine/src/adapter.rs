//! Remote apply adapter.

use crate::error::ApplyError;
use medsync_core::{EntityKey, OperationId, OperationKind, Payload, PendingOperation, Timestamp};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Applies one queued operation to the remote store.
///
/// Implementations translate the generic operation into a backend call and
/// classify every failure through [`ApplyError`]. Apply must be idempotent:
/// a Create carries its entity id, so re-sending one is an upsert, and
/// deleting a missing record succeeds.
pub trait RemoteAdapter: Send + Sync + 'static {
    /// Applies `op`.
    fn apply(&self, op: &PendingOperation)
        -> impl Future<Output = Result<(), ApplyError>> + Send;
}

impl<A: RemoteAdapter> RemoteAdapter for Arc<A> {
    fn apply(&self, op: &PendingOperation) -> impl Future<Output = Result<(), ApplyError>> + Send {
        A::apply(self, op)
    }
}

/// A record held by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    /// Last written payload.
    pub payload: Payload,
    /// Number of writes applied to this record.
    pub version: u64,
    /// Operation that last wrote it.
    pub written_by: OperationId,
    /// When it was last written.
    pub updated_at: Timestamp,
}

/// One call seen by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    /// The operation that was applied.
    pub op_id: OperationId,
    /// Target entity.
    pub entity: EntityKey,
    /// Create, update or delete.
    pub kind: OperationKind,
    /// Payload sent with the call.
    pub payload: Payload,
}

/// In-memory reference remote store.
///
/// Create and Update upsert by entity key; Delete is idempotent. Every call
/// is recorded for inspection.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    records: RwLock<BTreeMap<EntityKey, RemoteRecord>>,
    calls: RwLock<Vec<RemoteCall>>,
}

impl MemoryRemote {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an operation synchronously.
    pub fn apply_now(&self, op: &PendingOperation) {
        let entity = op.entity_key();
        self.calls.write().push(RemoteCall {
            op_id: op.id,
            entity,
            kind: op.kind,
            payload: op.payload.clone(),
        });

        let mut records = self.records.write();
        match op.kind {
            OperationKind::Create | OperationKind::Update => {
                let version = records.get(&entity).map_or(0, |r| r.version) + 1;
                records.insert(
                    entity,
                    RemoteRecord {
                        payload: op.payload.clone(),
                        version,
                        written_by: op.id,
                        updated_at: Timestamp::now(),
                    },
                );
            }
            OperationKind::Delete => {
                records.remove(&entity);
            }
        }
    }

    /// Looks up a stored record.
    pub fn get(&self, entity: &EntityKey) -> Option<RemoteRecord> {
        self.records.read().get(entity).cloned()
    }

    /// Current payload of every stored record.
    pub fn snapshot(&self) -> BTreeMap<EntityKey, Payload> {
        self.records
            .read()
            .iter()
            .map(|(key, record)| (*key, record.payload.clone()))
            .collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.read().clone()
    }

    /// Number of calls received.
    pub fn call_count(&self) -> usize {
        self.calls.read().len()
    }

    /// Calls received for one operation.
    pub fn calls_for(&self, op_id: OperationId) -> usize {
        self.calls.read().iter().filter(|c| c.op_id == op_id).count()
    }
}

impl RemoteAdapter for MemoryRemote {
    async fn apply(&self, op: &PendingOperation) -> Result<(), ApplyError> {
        self.apply_now(op);
        Ok(())
    }
}
