//! Test fixtures and queue helpers.

use medsync_core::{MutationQueue, QueueConfig};
use medsync_engine::{ConnectivityMonitor, RetryConfig, SyncConfig};
use medsync_storage::InMemoryBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A file-backed queue location with automatic cleanup.
pub struct TempQueueDir {
    dir: TempDir,
    path: PathBuf,
}

impl TempQueueDir {
    /// Creates a fresh directory.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("queue").join("mutations.log");
        Self { dir, path }
    }

    /// Path of the queue file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The temporary directory.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Opens (or reopens) the queue with default configuration.
    pub fn open(&self) -> Arc<MutationQueue> {
        self.open_with(QueueConfig::default())
    }

    /// Opens (or reopens) the queue.
    pub fn open_with(&self, config: QueueConfig) -> Arc<MutationQueue> {
        Arc::new(MutationQueue::open_path(&self.path, config).expect("Failed to open queue"))
    }
}

impl Default for TempQueueDir {
    fn default() -> Self {
        Self::new()
    }
}

/// An in-memory "disk" that queues can be opened and reopened over.
#[derive(Debug, Clone, Default)]
pub struct MemoryDisk {
    backend: InMemoryBackend,
}

impl MemoryDisk {
    /// Creates an empty disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a queue over the disk, replaying what it holds.
    pub fn open(&self) -> Arc<MutationQueue> {
        Arc::new(
            MutationQueue::open(Box::new(self.backend.clone()), QueueConfig::default())
                .expect("Failed to open queue"),
        )
    }

    /// The raw backend.
    pub fn backend(&self) -> InMemoryBackend {
        self.backend.clone()
    }
}

/// A monitor that starts online and applies reports immediately.
pub fn online() -> ConnectivityMonitor {
    ConnectivityMonitor::from_config(true, &fast_config())
}

/// A monitor that starts offline and applies reports immediately.
pub fn offline() -> ConnectivityMonitor {
    ConnectivityMonitor::from_config(false, &fast_config())
}

/// Coordinator configuration with millisecond backoff and no sweep.
pub fn fast_config() -> SyncConfig {
    SyncConfig::new()
        .without_sweep()
        .with_debounce(Duration::ZERO)
        .with_timeout(Duration::from_secs(2))
        .with_retry(
            RetryConfig::new(5)
                .with_base_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(10)),
        )
}

/// Polls `condition` every few milliseconds until it holds or `limit`
/// passes. Returns whether it held.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
