//! Queued operations.

use crate::types::{
    EntityId, EntityType, FailureKind, OperationId, OperationKind, OperationStatus, Payload,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one entity across all entity types.
///
/// Operations that share a key are applied strictly in enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Kind of record.
    pub entity_type: EntityType,
    /// Record id.
    pub entity_id: EntityId,
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// A local mutation submitted for queuing.
///
/// `Create` mutations get their entity id from the operation id assigned at
/// enqueue time; `Update` and `Delete` name the entity they target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Kind of record.
    pub entity_type: EntityType,
    /// Create, update or delete.
    pub kind: OperationKind,
    /// Target entity (absent for creates).
    pub entity_id: Option<EntityId>,
    /// Opaque data.
    pub payload: Payload,
}

impl Mutation {
    /// A new entity.
    #[must_use]
    pub fn create(entity_type: EntityType, payload: Payload) -> Self {
        Self {
            entity_type,
            kind: OperationKind::Create,
            entity_id: None,
            payload,
        }
    }

    /// A replacement of an existing entity.
    #[must_use]
    pub fn update(entity_type: EntityType, entity_id: EntityId, payload: Payload) -> Self {
        Self {
            entity_type,
            kind: OperationKind::Update,
            entity_id: Some(entity_id),
            payload,
        }
    }

    /// Removal of an existing entity.
    #[must_use]
    pub fn delete(entity_type: EntityType, entity_id: EntityId) -> Self {
        Self {
            entity_type,
            kind: OperationKind::Delete,
            entity_id: Some(entity_id),
            payload: Payload::empty(),
        }
    }
}

/// One queued mutation and its sync bookkeeping.
///
/// This is also the body of an `Enqueued` log record, so new fields must be
/// `#[serde(default)]` to keep older logs readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique id, assigned at enqueue.
    pub id: OperationId,
    /// Enqueue order. Strictly increasing across the queue.
    pub sequence: u64,
    /// Kind of record.
    pub entity_type: EntityType,
    /// Target record.
    pub entity_id: EntityId,
    /// Create, update or delete.
    pub kind: OperationKind,
    /// Opaque data.
    pub payload: Payload,
    /// When the mutation was enqueued.
    pub created_at: Timestamp,
    /// When the last apply attempt started.
    #[serde(default)]
    pub last_attempt_at: Option<Timestamp>,
    /// Number of apply attempts ever made. Never decreases.
    #[serde(default)]
    pub sync_attempts: u32,
    /// `sync_attempts` at the time the op was last admitted to automatic
    /// retry. The dead-letter limit counts attempts from here.
    #[serde(default)]
    pub attempt_budget_start: u32,
    /// Current status.
    pub status: OperationStatus,
    /// Last error, if any.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Why the op failed, when `status` is `Failed`.
    #[serde(default)]
    pub failure: Option<FailureKind>,
}

impl PendingOperation {
    /// Builds a fresh `Pending` operation from a mutation.
    #[must_use]
    pub fn from_mutation(id: OperationId, sequence: u64, mutation: Mutation) -> Self {
        let entity_id = mutation.entity_id.unwrap_or_else(|| id.into());
        Self {
            id,
            sequence,
            entity_type: mutation.entity_type,
            entity_id,
            kind: mutation.kind,
            payload: mutation.payload,
            created_at: Timestamp::now(),
            last_attempt_at: None,
            sync_attempts: 0,
            attempt_budget_start: 0,
            status: OperationStatus::Pending,
            error_message: None,
            failure: None,
        }
    }

    /// The entity this operation targets.
    #[must_use]
    pub fn entity_key(&self) -> EntityKey {
        EntityKey {
            entity_type: self.entity_type,
            entity_id: self.entity_id,
        }
    }

    /// Attempts made since the op was last admitted to automatic retry.
    #[must_use]
    pub fn attempts_in_budget(&self) -> u32 {
        self.sync_attempts.saturating_sub(self.attempt_budget_start)
    }

    /// Returns true if the op has never been sent to the remote.
    #[must_use]
    pub fn never_attempted(&self) -> bool {
        self.sync_attempts == 0
    }

    /// Returns true if the op is waiting for the coordinator.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == OperationStatus::Pending
    }

    /// Returns true if the op is dead-lettered or rejected.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == OperationStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_targets_its_own_id() {
        let id = OperationId::generate();
        let op = PendingOperation::from_mutation(
            id,
            1,
            Mutation::create(EntityType::HealthRecord, Payload::new(b"bp".to_vec())),
        );
        assert_eq!(op.entity_id, EntityId::from(id));
        assert_eq!(op.status, OperationStatus::Pending);
        assert!(op.never_attempted());
    }

    #[test]
    fn delete_targets_given_entity() {
        let entity = EntityId::from(OperationId::generate());
        let op = PendingOperation::from_mutation(
            OperationId::generate(),
            2,
            Mutation::delete(EntityType::FamilyMember, entity),
        );
        assert_eq!(op.entity_key().entity_id, entity);
        assert!(op.payload.is_empty());
    }

    #[test]
    fn budget_counts_from_last_admission() {
        let mut op = PendingOperation::from_mutation(
            OperationId::generate(),
            1,
            Mutation::create(EntityType::UserProfile, Payload::empty()),
        );
        op.sync_attempts = 7;
        op.attempt_budget_start = 5;
        assert_eq!(op.attempts_in_budget(), 2);
    }
}
