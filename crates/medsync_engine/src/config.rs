//! Configuration for the sync coordinator.

use std::time::Duration;

/// Configuration for draining the queue.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of adapter calls in flight across entities.
    pub concurrency: usize,
    /// Per-call timeout. A call that exceeds it counts as a transient failure.
    pub timeout: Duration,
    /// Delay before re-draining when work is left after a drain.
    pub sweep_interval: Option<Duration>,
    /// Quiet period before a connectivity report becomes a transition.
    /// Read by [`crate::ConnectivityMonitor::from_config`].
    pub debounce: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            concurrency: 3,
            timeout: Duration::from_secs(30),
            sweep_interval: Some(Duration::from_secs(5 * 60)),
            debounce: Duration::from_secs(2),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the number of concurrent adapter calls (at least one).
    pub fn with_concurrency(mut self, permits: usize) -> Self {
        self.concurrency = permits.max(1);
        self
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Disables the follow-up sweep.
    pub fn without_sweep(mut self) -> Self {
        self.sweep_interval = None;
        self
    }

    /// Sets the connectivity debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts allowed per budget before an op is dead-lettered.
    pub max_attempts: u32,
    /// Delay unit for exponential backoff.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Creates a retry configuration with the given attempt limit.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5 * 60),
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before the next attempt, given attempts already made.
    ///
    /// `min(base * 2^attempts, max_delay)`; saturates instead of overflowing.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Some(Duration::from_secs(300)));
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_concurrency(0)
            .with_timeout(Duration::from_millis(50))
            .without_sweep()
            .with_debounce(Duration::ZERO);

        assert_eq!(config.concurrency, 1);
        assert_eq!(config.timeout, Duration::from_millis(50));
        assert!(config.sweep_interval.is_none());
        assert!(config.debounce.is_zero());
    }

    #[test]
    fn retry_delay_calculation() {
        let retry = RetryConfig::new(5)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1));

        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(retry.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(200), Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn backoff_is_monotonic_and_bounded(
            base_ms in 0u64..10_000,
            max_ms in 0u64..1_000_000,
            attempts in 0u32..64,
        ) {
            let retry = RetryConfig::new(5)
                .with_base_delay(Duration::from_millis(base_ms))
                .with_max_delay(Duration::from_millis(max_ms));

            let current = retry.delay_for_attempt(attempts);
            let next = retry.delay_for_attempt(attempts + 1);
            prop_assert!(current <= next);
            prop_assert!(next <= retry.max_delay);
        }
    }
}
