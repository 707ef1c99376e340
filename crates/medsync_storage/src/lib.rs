//! # MedSync Storage
//!
//! Durable byte-store backends for the MedSync mutation queue.
//!
//! Backends are **opaque byte stores** - they do not interpret the records
//! the queue log writes into them. The queue owns its record format; a
//! backend only has to append, read back, flush and (for compaction)
//! atomically replace its contents.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral queues. Clones share the
//!   same bytes, which lets tests "restart" a queue over surviving storage.
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use medsync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"queued").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"queued");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
