//! Drain planning.
//!
//! Turns a queue snapshot into independent per-entity chains. Within an
//! entity, a queued Delete supersedes every earlier queued Create or Update;
//! superseded ops are resolved locally without a remote call.

use medsync_core::{EntityKey, OperationKind, OperationStatus, PendingOperation};
use std::collections::HashMap;

/// Ordered work for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChain {
    /// The entity.
    pub entity: EntityKey,
    /// Ops to apply strictly in this order.
    pub ops: Vec<PendingOperation>,
}

/// Work for one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainPlan {
    /// One chain per entity with something to send, oldest entity first.
    pub chains: Vec<EntityChain>,
    /// Ops to mark synced without a remote call.
    pub resolved_locally: Vec<PendingOperation>,
    /// Pending ops held back behind a failed op of the same entity.
    pub blocked: usize,
}

impl DrainPlan {
    /// Ops this drain will account for.
    pub fn total(&self) -> usize {
        self.resolved_locally.len() + self.chains.iter().map(|c| c.ops.len()).sum::<usize>()
    }

    /// Returns true if there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Builds a plan from queued ops given in enqueue order.
pub fn plan(ops: &[PendingOperation]) -> DrainPlan {
    let mut order: Vec<EntityKey> = Vec::new();
    let mut groups: HashMap<EntityKey, Vec<&PendingOperation>> = HashMap::new();
    for op in ops {
        let key = op.entity_key();
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(op);
    }

    let mut result = DrainPlan::default();
    for key in order {
        let Some(group) = groups.remove(&key) else {
            continue;
        };
        plan_entity(key, &group, &mut result);
    }
    result
}

fn plan_entity(entity: EntityKey, group: &[&PendingOperation], out: &mut DrainPlan) {
    // Left alone while an earlier attempt is unresolved.
    if group.iter().any(|op| op.status == OperationStatus::Syncing) {
        out.blocked += group.iter().filter(|op| op.is_pending()).count();
        return;
    }

    let last_delete = group
        .iter()
        .rposition(|op| op.is_pending() && op.kind == OperationKind::Delete);

    let (superseded, rest): (Vec<&PendingOperation>, &[&PendingOperation]) = match last_delete {
        Some(d) => {
            let superseded: Vec<_> = group[..d]
                .iter()
                .copied()
                .filter(|op| op.is_pending() || op.is_failed())
                .collect();
            let never_sent = superseded
                .iter()
                .any(|op| op.kind == OperationKind::Create && op.never_attempted());
            if never_sent {
                out.resolved_locally.extend(superseded.into_iter().cloned());
                out.resolved_locally.push(group[d].clone());
                (Vec::new(), &group[d + 1..])
            } else {
                (superseded, &group[d..])
            }
        }
        None => (Vec::new(), group),
    };
    out.resolved_locally
        .extend(superseded.into_iter().cloned());

    let mut chain = Vec::new();
    let mut iter = rest.iter();
    for op in iter.by_ref() {
        if op.is_failed() {
            break;
        }
        chain.push((*op).clone());
    }
    out.blocked += iter.filter(|op| op.is_pending()).count();

    if !chain.is_empty() {
        out.chains.push(EntityChain { entity, ops: chain });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_core::{
        EntityId, EntityType, FailureKind, Mutation, OperationId, Payload,
    };

    struct Ops {
        ops: Vec<PendingOperation>,
    }

    impl Ops {
        fn new() -> Self {
            Self { ops: Vec::new() }
        }

        fn push(&mut self, mutation: Mutation) -> PendingOperation {
            let seq = self.ops.len() as u64;
            let op = PendingOperation::from_mutation(OperationId::generate(), seq, mutation);
            self.ops.push(op.clone());
            op
        }

        fn create(&mut self) -> PendingOperation {
            self.push(Mutation::create(
                EntityType::HealthRecord,
                Payload::new(b"v1".to_vec()),
            ))
        }

        fn update(&mut self, id: EntityId) -> PendingOperation {
            self.push(Mutation::update(
                EntityType::HealthRecord,
                id,
                Payload::new(b"v2".to_vec()),
            ))
        }

        fn delete(&mut self, id: EntityId) -> PendingOperation {
            self.push(Mutation::delete(EntityType::HealthRecord, id))
        }

        fn edit(&mut self, id: OperationId, f: impl FnOnce(&mut PendingOperation)) {
            if let Some(op) = self.ops.iter_mut().find(|op| op.id == id) {
                f(op);
            }
        }
    }

    fn ids(ops: &[PendingOperation]) -> Vec<OperationId> {
        ops.iter().map(|op| op.id).collect()
    }

    #[test]
    fn independent_entities_get_separate_chains() {
        let mut ops = Ops::new();
        let a = ops.create();
        let b = ops.create();
        let a2 = ops.update(a.entity_id);

        let plan = plan(&ops.ops);
        assert_eq!(plan.chains.len(), 2);
        assert_eq!(ids(&plan.chains[0].ops), vec![a.id, a2.id]);
        assert_eq!(ids(&plan.chains[1].ops), vec![b.id]);
        assert_eq!(plan.total(), 3);
    }

    #[test]
    fn unsent_create_then_delete_resolves_locally() {
        let mut ops = Ops::new();
        let create = ops.create();
        let update = ops.update(create.entity_id);
        let delete = ops.delete(create.entity_id);

        let plan = plan(&ops.ops);
        assert!(plan.chains.is_empty());
        assert_eq!(
            ids(&plan.resolved_locally),
            vec![create.id, update.id, delete.id]
        );
    }

    #[test]
    fn delete_of_remote_entity_is_sent_once() {
        let mut ops = Ops::new();
        let id = EntityId::from(OperationId::generate());
        let u1 = ops.update(id);
        let u2 = ops.update(id);
        let delete = ops.delete(id);

        let plan = plan(&ops.ops);
        assert_eq!(ids(&plan.resolved_locally), vec![u1.id, u2.id]);
        assert_eq!(plan.chains.len(), 1);
        assert_eq!(ids(&plan.chains[0].ops), vec![delete.id]);
    }

    #[test]
    fn attempted_create_keeps_delete_remote() {
        let mut ops = Ops::new();
        let create = ops.create();
        let delete = ops.delete(create.entity_id);
        ops.edit(create.id, |op| op.sync_attempts = 1);

        let plan = plan(&ops.ops);
        assert_eq!(ids(&plan.resolved_locally), vec![create.id]);
        assert_eq!(ids(&plan.chains[0].ops), vec![delete.id]);
    }

    #[test]
    fn ops_after_delete_follow_it() {
        let mut ops = Ops::new();
        let id = EntityId::from(OperationId::generate());
        let delete = ops.delete(id);
        let recreate = ops.update(id);

        let plan = plan(&ops.ops);
        assert!(plan.resolved_locally.is_empty());
        assert_eq!(ids(&plan.chains[0].ops), vec![delete.id, recreate.id]);
    }

    #[test]
    fn failed_op_blocks_only_its_entity() {
        let mut ops = Ops::new();
        let stuck = ops.create();
        let behind = ops.update(stuck.entity_id);
        let other = ops.create();
        ops.edit(stuck.id, |op| {
            op.status = OperationStatus::Failed;
            op.failure = Some(FailureKind::Conflict);
            op.sync_attempts = 1;
        });

        let plan = plan(&ops.ops);
        assert_eq!(plan.blocked, 1);
        assert_eq!(plan.chains.len(), 1);
        assert_eq!(ids(&plan.chains[0].ops), vec![other.id]);
        assert!(!ids(&plan.resolved_locally).contains(&behind.id));
    }

    #[test]
    fn delete_clears_failed_predecessor() {
        let mut ops = Ops::new();
        let id = EntityId::from(OperationId::generate());
        let failed = ops.update(id);
        let delete = ops.delete(id);
        ops.edit(failed.id, |op| {
            op.status = OperationStatus::Failed;
            op.sync_attempts = 5;
        });

        let plan = plan(&ops.ops);
        assert_eq!(plan.blocked, 0);
        assert_eq!(ids(&plan.resolved_locally), vec![failed.id]);
        assert_eq!(ids(&plan.chains[0].ops), vec![delete.id]);
    }

    #[test]
    fn failed_only_queue_is_empty_plan() {
        let mut ops = Ops::new();
        let op = ops.create();
        ops.edit(op.id, |op| op.status = OperationStatus::Failed);
        assert!(plan(&ops.ops).is_empty());
    }
}
