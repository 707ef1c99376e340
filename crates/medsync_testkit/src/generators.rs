//! Property-based test generators using proptest.
//!
//! A [`Workload`] is a list of steps against a handful of entity slots,
//! interleaved across slots the way a user would edit several records
//! while offline.

use medsync_core::{EntityId, EntityType, Mutation, OperationId, Payload};
use proptest::prelude::*;

/// Strategy for entity types other than file uploads.
pub fn entity_type_strategy() -> impl Strategy<Value = EntityType> {
    prop_oneof![
        Just(EntityType::HealthRecord),
        Just(EntityType::FamilyMember),
        Just(EntityType::UserProfile),
    ]
}

/// Strategy for small opaque payloads.
pub fn payload_strategy() -> impl Strategy<Value = Payload> {
    prop::collection::vec(any::<u8>(), 0..64).prop_map(Payload::new)
}

/// Strategy for file-upload payloads with an allowed content type.
pub fn upload_payload_strategy() -> impl Strategy<Value = Payload> {
    (
        prop::collection::vec(any::<u8>(), 1..256),
        prop_oneof![
            Just("application/pdf"),
            Just("image/jpeg"),
            Just("image/png"),
        ],
    )
        .prop_map(|(bytes, mime)| Payload::new(bytes).with_content_type(mime))
}

/// One edit against an entity slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Create a new entity in the slot.
    Create(Payload),
    /// Update the slot's entity.
    Update(Payload),
    /// Delete the slot's entity.
    Delete,
}

/// Interleaved edits across entity slots.
#[derive(Debug, Clone)]
pub struct Workload {
    /// Entity type of each slot.
    pub slots: Vec<EntityType>,
    /// `(slot, step)` in enqueue order.
    pub steps: Vec<(usize, Step)>,
}

impl Workload {
    /// Turns the steps into mutations.
    ///
    /// Slots start out pointing at a pre-existing remote entity. `Create`
    /// repoints its slot at the entity it creates, whose id is only known
    /// after enqueue, so the caller supplies `enqueue` and gets back the
    /// operation id it assigned.
    pub fn replay<E>(&self, mut enqueue: E) -> Result<(), String>
    where
        E: FnMut(Mutation) -> Result<OperationId, String>,
    {
        let mut ids: Vec<EntityId> = self
            .slots
            .iter()
            .map(|_| EntityId::from(OperationId::generate()))
            .collect();

        for (slot, step) in &self.steps {
            let entity_type = self.slots[*slot];
            let id = ids[*slot];
            match step {
                Step::Create(payload) => {
                    let op = enqueue(Mutation::create(entity_type, payload.clone()))?;
                    ids[*slot] = EntityId::from(op);
                }
                Step::Update(payload) => {
                    enqueue(Mutation::update(entity_type, id, payload.clone()))?;
                }
                Step::Delete => {
                    enqueue(Mutation::delete(entity_type, id))?;
                }
            }
        }
        Ok(())
    }
}

/// Strategy for a single step.
pub fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        1 => payload_strategy().prop_map(Step::Create),
        4 => payload_strategy().prop_map(Step::Update),
        1 => Just(Step::Delete),
    ]
}

/// Strategy for workloads over up to `max_slots` entities and `max_steps`
/// steps.
pub fn workload_strategy(max_slots: usize, max_steps: usize) -> impl Strategy<Value = Workload> {
    prop::collection::vec(entity_type_strategy(), 1..=max_slots.max(1)).prop_flat_map(
        move |slots| {
            let count = slots.len();
            prop::collection::vec((0..count, step_strategy()), 0..=max_steps).prop_map(
                move |steps| Workload {
                    slots: slots.clone(),
                    steps,
                },
            )
        },
    )
}
