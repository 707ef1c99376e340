//! Queue configuration.

use crate::validation::ValidationPolicy;

/// Configuration for opening a [`crate::MutationQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Flush the backend after every record (safer but slower).
    pub sync_on_write: bool,

    /// Rewrite the log as a snapshot once this many records have been
    /// appended since the last compaction (0 = never).
    pub compact_after_records: usize,

    /// Enqueue-time validation rules.
    pub validation: ValidationPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            compact_after_records: 1024,
            validation: ValidationPolicy::default(),
        }
    }
}

impl QueueConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to flush after every record.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub const fn compact_after_records(mut self, records: usize) -> Self {
        self.compact_after_records = records;
        self
    }

    /// Sets the validation policy.
    #[must_use]
    pub fn validation(mut self, policy: ValidationPolicy) -> Self {
        self.validation = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_durable() {
        let config = QueueConfig::default();
        assert!(config.sync_on_write);
        assert_eq!(config.compact_after_records, 1024);
    }

    #[test]
    fn builder_overrides() {
        let config = QueueConfig::new()
            .sync_on_write(false)
            .compact_after_records(0)
            .validation(ValidationPolicy::default().with_max_payload_bytes(1));
        assert!(!config.sync_on_write);
        assert_eq!(config.compact_after_records, 0);
        assert_eq!(config.validation.max_payload_bytes, 1);
    }
}
