//! Crash simulation for queue durability tests.
//!
//! [`CrashableBackend`] wraps an [`InMemoryBackend`] and "kills the
//! process" once a byte budget is exhausted: the write in progress is cut
//! short and every later write fails, so nothing gets rolled back. Reopening
//! a queue over a clone of the inner backend then shows exactly what a
//! restarted process would find on disk.
//!
//! ```rust,ignore
//! let disk = InMemoryBackend::new();
//! let backend = CrashableBackend::new(disk.clone());
//! backend.crash_after(40);
//! // ... drive a queue until a write fails ...
//! let recovered = MutationQueue::open(Box::new(disk), QueueConfig::default())?;
//! ```

use medsync_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
}

/// A storage backend that can simulate a crash mid-write.
///
/// Clones share the crash switch, so a test can keep one handle while the
/// queue owns another.
#[derive(Debug, Clone)]
pub struct CrashableBackend {
    inner: InMemoryBackend,
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Wraps `inner`.
    pub fn new(inner: InMemoryBackend) -> Self {
        Self {
            inner,
            state: Arc::new(CrashState {
                crash_after_bytes: AtomicUsize::new(usize::MAX),
                bytes_written: AtomicUsize::new(0),
                crashed: AtomicBool::new(false),
                fail_on_flush: AtomicBool::new(false),
            }),
        }
    }

    /// Crashes once `bytes` more bytes have been written.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.state.bytes_written.load(Ordering::SeqCst);
        self.state
            .crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Crashes on the next flush. Appended bytes stay on "disk".
    pub fn crash_on_flush(&self) {
        self.state.fail_on_flush.store(true, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// The bytes that survived.
    pub fn disk(&self) -> InMemoryBackend {
        self.inner.clone()
    }

    fn dead(&self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

fn crash_error(message: &str) -> StorageError {
    StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, message))
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.dead()?;
        let written = self.state.bytes_written.load(Ordering::SeqCst);
        let limit = self.state.crash_after_bytes.load(Ordering::SeqCst);

        if written.saturating_add(data.len()) > limit {
            self.state.crashed.store(true, Ordering::SeqCst);
            let partial = limit.saturating_sub(written);
            if partial > 0 {
                self.inner.append(&data[..partial])?;
            }
            self.state.bytes_written.store(limit, Ordering::SeqCst);
            return Err(crash_error("simulated crash during write"));
        }

        self.state
            .bytes_written
            .fetch_add(data.len(), Ordering::SeqCst);
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.dead()?;
        if self.state.fail_on_flush.load(Ordering::SeqCst) {
            self.state.crashed.store(true, Ordering::SeqCst);
            return Err(crash_error("simulated crash during flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.dead()?;
        self.inner.truncate(new_size)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.dead()?;
        self.inner.replace(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_write_then_dead() {
        let disk = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(disk.clone());
        backend.append(b"hello").unwrap();
        backend.crash_after(3);

        assert!(backend.append(b"world").is_err());
        assert!(backend.has_crashed());
        assert_eq!(disk.data(), b"hellowor");

        assert!(matches!(backend.truncate(5), Err(StorageError::Closed)));
        assert!(backend.append(b"x").is_err());
        assert_eq!(disk.data(), b"hellowor");
    }

    #[test]
    fn flush_crash_keeps_appended_bytes() {
        let disk = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(disk.clone());
        backend.crash_on_flush();
        backend.append(b"abc").unwrap();
        assert!(backend.flush().is_err());
        assert_eq!(disk.data(), b"abc");
    }
}
