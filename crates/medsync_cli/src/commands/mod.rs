//! CLI command implementations.

pub mod compact;
pub mod dump_log;
pub mod enqueue;
pub mod list;
pub mod retry;
pub mod status;
pub mod verify;

use medsync_core::{MutationQueue, QueueConfig};
use medsync_storage::InMemoryBackend;
use std::path::Path;

/// Opens a queue file that must already exist.
pub(crate) fn open_existing(path: &Path) -> Result<MutationQueue, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("Queue file not found: {}", path.display()).into());
    }
    Ok(MutationQueue::open_path(path, QueueConfig::default())?)
}

/// Opens an in-memory copy of a queue file.
///
/// Opening a queue truncates a torn tail and resets interrupted ops, so
/// read-only commands replay a copy and leave the file untouched.
pub(crate) fn open_snapshot(path: &Path) -> Result<MutationQueue, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("Queue file not found: {}", path.display()).into());
    }
    let bytes = std::fs::read(path)?;
    Ok(MutationQueue::open(
        Box::new(InMemoryBackend::with_data(bytes)),
        QueueConfig::default(),
    )?)
}
