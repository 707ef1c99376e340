//! # MedSync Testkit
//!
//! Test utilities for MedSync.
//!
//! This crate provides:
//! - Queue fixtures over temp files and shared in-memory "disks"
//! - Property-based workload generators using proptest
//! - A scripted remote with per-op failures and latency
//! - A storage backend that simulates a crash mid-write
//!
//! ## Usage
//!
//! ```rust,ignore
//! use medsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn drains() {
//!     let disk = MemoryDisk::new();
//!     let queue = disk.open();
//!     let coordinator = SyncCoordinator::new(queue, ScriptedRemote::new(), online(), fast_config());
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
}

pub use crash::CrashableBackend;
pub use fixtures::{fast_config, offline, online, wait_until, MemoryDisk, TempQueueDir};
pub use generators::{Step, Workload};
pub use remote::ScriptedRemote;
