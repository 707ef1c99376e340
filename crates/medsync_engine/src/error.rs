//! Error types for the sync engine.

use medsync_core::FailureKind;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can stop a drain or a coordinator call.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The queue could not record a transition.
    #[error("queue error: {0}")]
    Queue(#[from] medsync_core::CoreError),

    /// A per-entity task panicked or was cancelled.
    #[error("sync task failed: {0}")]
    Task(String),

    /// The operation needs a tokio runtime and none is running.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// The concurrency limiter was closed.
    #[error("sync cancelled")]
    Cancelled,
}

/// Why the remote did not apply an operation.
///
/// Adapters classify every failure; the coordinator decides what to do with
/// it based on [`ApplyError::kind`] alone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} failure: {message}")]
pub struct ApplyError {
    /// Failure class.
    pub kind: FailureKind,
    /// Message from the remote, surfaced to the user.
    pub message: String,
}

impl ApplyError {
    /// Creates an error of the given class.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A retryable network or server error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    /// Credentials were rejected.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Auth, message)
    }

    /// The remote state conflicts with the operation.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Conflict, message)
    }

    /// The payload exceeds a remote limit.
    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Quota, message)
    }

    /// The remote rejected the payload as invalid.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    /// The call did not finish within `limit`.
    pub fn timeout(limit: Duration) -> Self {
        Self::transient(format!("remote call timed out after {limit:?}"))
    }

    /// Returns true if the operation may be retried automatically.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}
