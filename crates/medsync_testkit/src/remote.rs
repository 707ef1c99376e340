//! Scripted remote for coordinator tests.

use medsync_core::{OperationId, PendingOperation};
use medsync_engine::{ApplyError, MemoryRemote, RemoteAdapter};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// A [`MemoryRemote`] whose failures and latency are scripted per op.
///
/// Calls that are scripted to fail never reach the store. Every call, failed
/// or not, is counted.
#[derive(Debug, Default)]
pub struct ScriptedRemote {
    store: MemoryRemote,
    failures: Mutex<HashMap<OperationId, VecDeque<ApplyError>>>,
    always: Mutex<HashMap<OperationId, ApplyError>>,
    attempts: Mutex<HashMap<OperationId, u32>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    offline: AtomicBool,
}

impl ScriptedRemote {
    /// Creates a remote that accepts everything immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next calls for `id` with `errors`, in order.
    pub fn fail_next<I>(&self, id: OperationId, errors: I)
    where
        I: IntoIterator<Item = ApplyError>,
    {
        self.failures
            .lock()
            .entry(id)
            .or_default()
            .extend(errors);
    }

    /// Fails every call for `id` with `error` until [`ScriptedRemote::heal`].
    pub fn fail_always(&self, id: OperationId, error: ApplyError) {
        self.always.lock().insert(id, error);
    }

    /// Clears every scripted failure.
    pub fn heal(&self) {
        self.failures.lock().clear();
        self.always.lock().clear();
        self.offline.store(false, Ordering::SeqCst);
    }

    /// Fails every call with a transient error while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.offline.store(unreachable, Ordering::SeqCst);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// The backing store.
    pub fn store(&self) -> &MemoryRemote {
        &self.store
    }

    /// `sync_attempts` of the last call seen for `id`.
    pub fn attempts_seen(&self, id: OperationId) -> u32 {
        self.attempts.lock().get(&id).copied().unwrap_or(0)
    }

    /// Total calls, failed or not.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn scripted_error(&self, id: OperationId) -> Option<ApplyError> {
        if self.offline.load(Ordering::SeqCst) {
            return Some(ApplyError::transient("remote unreachable"));
        }
        if let Some(error) = self.always.lock().get(&id) {
            return Some(error.clone());
        }
        self.failures.lock().get_mut(&id).and_then(VecDeque::pop_front)
    }
}

impl RemoteAdapter for ScriptedRemote {
    async fn apply(&self, op: &PendingOperation) -> Result<(), ApplyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.attempts.lock().insert(op.id, op.sync_attempts);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let result = match self.scripted_error(op.id) {
            Some(error) => Err(error),
            None => {
                self.store.apply_now(op);
                Ok(())
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
