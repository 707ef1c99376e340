//! # MedSync Core
//!
//! Data model and durable mutation queue for the MedSync offline-first
//! sync engine.
//!
//! This crate provides:
//! - The queued operation model ([`PendingOperation`], [`Mutation`])
//! - Enqueue-time validation ([`ValidationPolicy`])
//! - A versioned, checksummed append-only log ([`QueueLog`])
//! - The single-writer [`MutationQueue`] built on top of it
//!
//! ## Key Invariants
//!
//! - A mutation that fails validation never enters the queue
//! - Every state transition is durable before the call returns
//! - Insertion order is preserved and defines per-entity ordering
//! - At most one operation per entity is `Syncing` at a time
//!
//! ## Example
//!
//! ```rust
//! use medsync_core::{EntityType, Mutation, MutationQueue, Payload, QueueConfig};
//! use medsync_storage::InMemoryBackend;
//!
//! let queue = MutationQueue::open(Box::new(InMemoryBackend::new()), QueueConfig::default()).unwrap();
//! let id = queue
//!     .enqueue(Mutation::create(EntityType::HealthRecord, Payload::new(b"{}".to_vec())))
//!     .unwrap();
//! assert_eq!(queue.get(id).unwrap().sync_attempts, 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod log;
mod operation;
mod queue;
mod types;
mod validation;

pub use config::QueueConfig;
pub use error::{CoreError, CoreResult};
pub use log::{
    compute_crc32, LogEntry, LogReader, QueueLog, QueueRecord, RecordType, StatusChange,
    LOG_MAGIC, LOG_VERSION,
};
pub use operation::{EntityKey, Mutation, PendingOperation};
pub use queue::{MutationQueue, QueueStats};
pub use types::{
    EntityId, EntityType, FailureKind, OperationId, OperationKind, OperationStatus, Payload,
    Timestamp,
};
pub use validation::{ValidationError, ValidationPolicy, MAX_PAYLOAD_BYTES};
