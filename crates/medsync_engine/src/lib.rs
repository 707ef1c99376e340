//! # MedSync Engine
//!
//! Reconciles the durable mutation queue with a remote store.
//!
//! This crate provides:
//! - A debounced connectivity monitor with explicit subscriptions
//! - The remote apply adapter trait and an in-memory reference store
//! - Drain planning with per-entity ordering and Delete supersession
//! - The sync coordinator (mutual exclusion, bounded concurrency,
//!   exponential backoff, dead-lettering, auth pause)
//! - A read-only status reporter with a `watch` subscription
//!
//! ## Key Invariants
//!
//! - At most one drain runs at a time
//! - Ops for one entity are applied in enqueue order, one at a time
//! - A failing entity never holds up other entities
//! - Apply is at-least-once; adapters make it idempotent
//! - Nothing is dropped silently: ops end up applied, resolved locally by a
//!   later Delete, or `Failed` and visible
//!
//! ## Example
//!
//! ```rust
//! use medsync_core::{EntityType, Mutation, MutationQueue, Payload, QueueConfig};
//! use medsync_engine::{ConnectivityMonitor, DrainOutcome, MemoryRemote, SyncConfig, SyncCoordinator};
//! use medsync_storage::InMemoryBackend;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let queue = Arc::new(
//!     MutationQueue::open(Box::new(InMemoryBackend::new()), QueueConfig::default()).unwrap(),
//! );
//! queue
//!     .enqueue(Mutation::create(EntityType::HealthRecord, Payload::new(b"{}".to_vec())))
//!     .unwrap();
//!
//! let monitor = ConnectivityMonitor::new(true, Duration::ZERO);
//! let coordinator = SyncCoordinator::new(queue, MemoryRemote::new(), monitor, SyncConfig::default());
//!
//! let outcome = coordinator.trigger().await.unwrap();
//! assert!(matches!(outcome, DrainOutcome::Completed(_)));
//! assert_eq!(coordinator.status().snapshot().pending_items, 0);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod adapter;
mod config;
mod connectivity;
mod coordinator;
mod error;
pub mod plan;
mod status;

pub use adapter::{MemoryRemote, RemoteAdapter, RemoteCall, RemoteRecord};
pub use config::{RetryConfig, SyncConfig};
pub use connectivity::{ConnectivityMonitor, ConnectivityState, Subscription};
pub use coordinator::{CoordinatorState, DrainOutcome, DrainReport, SyncCoordinator};
pub use error::{ApplyError, SyncError, SyncResult};
pub use plan::{DrainPlan, EntityChain};
pub use status::{ItemStatus, StatusReporter, SyncStatus, SyncSession};
