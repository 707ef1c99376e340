//! Connectivity monitor.
//!
//! The host platform reports raw online/offline signals through
//! [`ConnectivityMonitor::report`]. The monitor debounces them and notifies
//! subscribers once per stable transition.

use crate::config::SyncConfig;
use medsync_core::Timestamp;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Last stable connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    /// Whether the remote is reachable.
    pub is_online: bool,
    /// When the state last changed.
    pub changed_at: Timestamp,
}

struct Listener {
    id: u64,
    on_online: Callback,
    on_offline: Callback,
}

struct Shared {
    state: RwLock<ConnectivityState>,
    listeners: Mutex<Vec<Listener>>,
    generation: AtomicU64,
    next_listener: AtomicU64,
    debounce: Duration,
}

impl Shared {
    fn settle(&self, online: bool) {
        {
            let mut state = self.state.write();
            if state.is_online == online {
                return;
            }
            *state = ConnectivityState {
                is_online: online,
                changed_at: Timestamp::now(),
            };
        }
        info!(online, "connectivity changed");

        // Called outside the lock so callbacks may subscribe or unsubscribe.
        let callbacks: Vec<Callback> = self
            .listeners
            .lock()
            .iter()
            .map(|l| {
                if online {
                    Arc::clone(&l.on_online)
                } else {
                    Arc::clone(&l.on_offline)
                }
            })
            .collect();
        for callback in callbacks {
            callback();
        }
    }
}

/// Debounced online/offline tracker with an explicit subscriber list.
///
/// Cloning yields another handle to the same monitor.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    shared: Arc<Shared>,
}

impl ConnectivityMonitor {
    /// Creates a monitor in the given initial state.
    ///
    /// A zero `debounce` applies every report immediately.
    pub fn new(initially_online: bool, debounce: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectivityState {
                    is_online: initially_online,
                    changed_at: Timestamp::now(),
                }),
                listeners: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
                next_listener: AtomicU64::new(0),
                debounce,
            }),
        }
    }

    /// Creates a monitor using the debounce window of `config`.
    pub fn from_config(initially_online: bool, config: &SyncConfig) -> Self {
        Self::new(initially_online, config.debounce)
    }

    /// Quiet period before a report becomes a transition.
    pub fn debounce(&self) -> Duration {
        self.shared.debounce
    }

    /// Feeds a raw signal from the platform.
    ///
    /// The report takes effect once `debounce` has passed without another
    /// report. A burst that ends in the current state changes nothing.
    /// Without a tokio runtime the report is applied immediately.
    pub fn report(&self, online: bool) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(online, generation, "connectivity report");

        if self.shared.debounce.is_zero() {
            self.shared.settle(online);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::clone(&self.shared);
                handle.spawn(async move {
                    tokio::time::sleep(shared.debounce).await;
                    if shared.generation.load(Ordering::SeqCst) == generation {
                        shared.settle(online);
                    }
                });
            }
            Err(_) => {
                warn!("no tokio runtime, applying connectivity report without debounce");
                self.shared.settle(online);
            }
        }
    }

    /// Registers callbacks for stable transitions.
    ///
    /// The callbacks stay registered until the returned [`Subscription`] is
    /// dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F, G>(&self, on_online: F, on_offline: G) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
        G: Fn() + Send + Sync + 'static,
    {
        let id = self.shared.next_listener.fetch_add(1, Ordering::SeqCst);
        self.shared.listeners.lock().push(Listener {
            id,
            on_online: Arc::new(on_online),
            on_offline: Arc::new(on_offline),
        });
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Returns the last stable state's online flag.
    pub fn is_online(&self) -> bool {
        self.shared.state.read().is_online
    }

    /// Returns the last stable state.
    pub fn state(&self) -> ConnectivityState {
        *self.shared.state.read()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.listeners.lock().len()
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &self.state())
            .field("debounce", &self.shared.debounce)
            .finish_non_exhaustive()
    }
}

/// Handle to a registered pair of connectivity callbacks.
///
/// Dropping it removes the callbacks.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Removes the callbacks now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners.lock().retain(|l| l.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(monitor: &ConnectivityMonitor) -> (Subscription, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let online = Arc::new(AtomicUsize::new(0));
        let offline = Arc::new(AtomicUsize::new(0));
        let (on, off) = (Arc::clone(&online), Arc::clone(&offline));
        let sub = monitor.subscribe(
            move || {
                on.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                off.fetch_add(1, Ordering::SeqCst);
            },
        );
        (sub, online, offline)
    }

    #[test]
    fn immediate_reports_without_debounce() {
        let monitor = ConnectivityMonitor::new(false, Duration::ZERO);
        let (_sub, online, offline) = counting(&monitor);

        monitor.report(true);
        monitor.report(true);
        assert!(monitor.is_online());
        assert_eq!(online.load(Ordering::SeqCst), 1);

        monitor.report(false);
        assert!(!monitor.is_online());
        assert_eq!(offline.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let monitor = ConnectivityMonitor::new(false, Duration::ZERO);
        let (sub, online, _) = counting(&monitor);
        assert_eq!(monitor.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(monitor.subscriber_count(), 0);

        monitor.report(true);
        assert_eq!(online.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscription_outliving_monitor_is_harmless() {
        let monitor = ConnectivityMonitor::new(false, Duration::ZERO);
        let (sub, _, _) = counting(&monitor);
        drop(monitor);
        drop(sub);
    }

    #[tokio::test]
    async fn flapping_collapses_into_one_transition() {
        let monitor = ConnectivityMonitor::new(false, Duration::from_millis(40));
        let (_sub, online, offline) = counting(&monitor);

        for _ in 0..5 {
            monitor.report(true);
            monitor.report(false);
        }
        monitor.report(true);
        assert!(!monitor.is_online());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(monitor.is_online());
        assert_eq!(online.load(Ordering::SeqCst), 1);
        assert_eq!(offline.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn config_debounce_delays_transitions() {
        let config = SyncConfig::new().with_debounce(Duration::from_millis(40));
        let monitor = ConnectivityMonitor::from_config(false, &config);
        assert_eq!(monitor.debounce(), Duration::from_millis(40));
        let (_sub, online, _) = counting(&monitor);

        monitor.report(true);
        assert!(!monitor.is_online());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(monitor.is_online());
        assert_eq!(online.load(Ordering::SeqCst), 1);

        let immediate =
            ConnectivityMonitor::from_config(false, &SyncConfig::new().with_debounce(Duration::ZERO));
        immediate.report(true);
        assert!(immediate.is_online());
    }

    #[test]
    fn default_config_debounces_two_seconds() {
        let monitor = ConnectivityMonitor::from_config(true, &SyncConfig::default());
        assert_eq!(monitor.debounce(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn burst_ending_in_stable_state_is_silent() {
        let monitor = ConnectivityMonitor::new(true, Duration::from_millis(40));
        let (_sub, online, offline) = counting(&monitor);

        monitor.report(false);
        monitor.report(true);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(monitor.is_online());
        assert_eq!(online.load(Ordering::SeqCst), 0);
        assert_eq!(offline.load(Ordering::SeqCst), 0);
    }
}
