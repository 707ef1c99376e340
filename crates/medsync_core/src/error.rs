//! Error types for the mutation queue.

use crate::types::{OperationId, OperationStatus};
use crate::validation::ValidationError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in queue operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] medsync_storage::StorageError),

    /// The mutation was rejected before entering the queue.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A record body could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// The queue log is corrupted.
    #[error("queue log corruption at offset {offset}: {message}")]
    LogCorruption {
        /// Offset of the offending record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the offending record.
        offset: u64,
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// A partial record could not be rolled back. The log refuses writes
    /// until the torn bytes are removed.
    #[error("queue log poisoned: partial record at offset {offset} could not be removed")]
    LogPoisoned {
        /// Offset where the partial record starts.
        offset: u64,
    },

    /// The log was written by a newer format version.
    #[error("unsupported queue log version {found}, this build reads up to {supported}")]
    UnsupportedVersion {
        /// Version found in the record.
        found: u16,
        /// Highest version this build understands.
        supported: u16,
    },

    /// No queued operation has this id.
    #[error("operation not found: {id}")]
    OperationNotFound {
        /// The missing operation.
        id: OperationId,
    },

    /// The requested status change is not allowed from the current status.
    #[error("operation {id} cannot go from {from} to {to}")]
    InvalidTransition {
        /// The operation.
        id: OperationId,
        /// Current status.
        from: OperationStatus,
        /// Requested status.
        to: OperationStatus,
    },

    /// Another operation for the same entity is already in flight.
    #[error("operation {id} blocked: {in_flight} for the same entity is already syncing")]
    EntityBusy {
        /// The operation that was refused.
        id: OperationId,
        /// The operation currently syncing.
        in_flight: OperationId,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::LogCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Returns true if this error is a rejected mutation rather than a
    /// queue or storage failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
