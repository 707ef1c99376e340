//! Queue log record types and serialization.
//!
//! Every record is framed as:
//!
//! ```text
//! magic "MSQL" (4) | version u16 LE (2) | type (1) | body length u32 LE (4) | CBOR body | crc32 LE (4)
//! ```
//!
//! The CRC covers everything before it. Bodies are serde structs whose later
//! fields are `#[serde(default)]`, so records written by an older version
//! decode unchanged.

use crate::error::{CoreError, CoreResult};
use crate::operation::PendingOperation;
use crate::types::{FailureKind, OperationId, Timestamp};
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a queue log record.
pub const LOG_MAGIC: [u8; 4] = *b"MSQL";

/// Current queue log format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Type tag of a queue log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// A new operation (or a snapshot of a live one after compaction).
    Enqueued = 1,
    /// An apply attempt started.
    Attempted = 2,
    /// A transient failure returned the op to `Pending`.
    Retrying = 3,
    /// The op was dead-lettered or rejected.
    Failed = 4,
    /// The op left the queue (synced, superseded or dismissed).
    Removed = 5,
    /// The op was readmitted to automatic retry with a fresh budget.
    Requeued = 6,
}

impl RecordType {
    /// Converts a byte to a record type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Enqueued),
            2 => Some(Self::Attempted),
            3 => Some(Self::Retrying),
            4 => Some(Self::Failed),
            5 => Some(Self::Removed),
            6 => Some(Self::Requeued),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Lowercase name used in dumps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Attempted => "attempted",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Removed => "removed",
            Self::Requeued => "requeued",
        }
    }
}

/// Body shared by all status transition records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// The operation.
    pub id: OperationId,
    /// When the transition happened.
    pub at: Timestamp,
    /// Total attempts, on `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Failure class, on `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Error message, on `Retrying`, `Failed` and deferring `Requeued`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusChange {
    fn new(id: OperationId) -> Self {
        Self {
            id,
            at: Timestamp::now(),
            attempts: None,
            failure: None,
            error: None,
        }
    }
}

/// A record in the queue log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueRecord {
    /// A new operation, or a live one re-emitted by compaction.
    Enqueued(PendingOperation),
    /// An apply attempt started.
    Attempted(StatusChange),
    /// A transient failure returned the op to `Pending`.
    Retrying(StatusChange),
    /// The op was dead-lettered or rejected.
    Failed(StatusChange),
    /// The op left the queue.
    Removed(StatusChange),
    /// A failed op was readmitted.
    Requeued(StatusChange),
}

impl QueueRecord {
    /// An apply attempt for `id` started now.
    #[must_use]
    pub fn attempted(id: OperationId) -> Self {
        Self::Attempted(StatusChange::new(id))
    }

    /// `id` goes back to `Pending` after `error`.
    #[must_use]
    pub fn retrying(id: OperationId, error: impl Into<String>) -> Self {
        Self::Retrying(StatusChange {
            error: Some(error.into()),
            ..StatusChange::new(id)
        })
    }

    /// `id` failed after `attempts` attempts.
    #[must_use]
    pub fn failed(
        id: OperationId,
        attempts: u32,
        failure: FailureKind,
        error: impl Into<String>,
    ) -> Self {
        Self::Failed(StatusChange {
            attempts: Some(attempts),
            failure: Some(failure),
            error: Some(error.into()),
            ..StatusChange::new(id)
        })
    }

    /// `id` leaves the queue.
    #[must_use]
    pub fn removed(id: OperationId) -> Self {
        Self::Removed(StatusChange::new(id))
    }

    /// `id` is readmitted to automatic retry.
    #[must_use]
    pub fn requeued(id: OperationId) -> Self {
        Self::Requeued(StatusChange::new(id))
    }

    /// `id` goes back to `Pending` with a fresh attempt budget after an
    /// attempt that says nothing about the op itself.
    #[must_use]
    pub fn deferred(id: OperationId, error: impl Into<String>) -> Self {
        Self::Requeued(StatusChange {
            error: Some(error.into()),
            ..StatusChange::new(id)
        })
    }

    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Enqueued(_) => RecordType::Enqueued,
            Self::Attempted(_) => RecordType::Attempted,
            Self::Retrying(_) => RecordType::Retrying,
            Self::Failed(_) => RecordType::Failed,
            Self::Removed(_) => RecordType::Removed,
            Self::Requeued(_) => RecordType::Requeued,
        }
    }

    /// Returns the operation this record is about.
    #[must_use]
    pub fn operation_id(&self) -> OperationId {
        match self {
            Self::Enqueued(op) => op.id,
            Self::Attempted(c)
            | Self::Retrying(c)
            | Self::Failed(c)
            | Self::Removed(c)
            | Self::Requeued(c) => c.id,
        }
    }

    /// Serializes the body (without envelope).
    ///
    /// # Errors
    ///
    /// Returns a codec error if CBOR encoding fails.
    pub fn encode_body(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        let result = match self {
            Self::Enqueued(op) => ciborium::into_writer(op, &mut buf),
            Self::Attempted(c)
            | Self::Retrying(c)
            | Self::Failed(c)
            | Self::Removed(c)
            | Self::Requeued(c) => ciborium::into_writer(c, &mut buf),
        };
        result.map_err(|e| CoreError::codec(e.to_string()))?;
        Ok(buf)
    }

    /// Deserializes a body of the given type.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the body is not valid CBOR for that type.
    pub fn decode_body(record_type: RecordType, body: &[u8]) -> CoreResult<Self> {
        fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> CoreResult<T> {
            ciborium::from_reader(body).map_err(|e| CoreError::codec(e.to_string()))
        }

        Ok(match record_type {
            RecordType::Enqueued => Self::Enqueued(decode(body)?),
            RecordType::Attempted => Self::Attempted(decode(body)?),
            RecordType::Retrying => Self::Retrying(decode(body)?),
            RecordType::Failed => Self::Failed(decode(body)?),
            RecordType::Removed => Self::Removed(decode(body)?),
            RecordType::Requeued => Self::Requeued(decode(body)?),
        })
    }

    /// Serializes the full framed record.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be encoded or exceeds 4 GiB.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let body = self.encode_body()?;
        let len = u32::try_from(body.len())
            .map_err(|_| CoreError::codec("queue record body exceeds 4 GiB"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&body);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        Ok(data)
    }
}

/// CRC-32 (IEEE polynomial) used to checksum log records.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Mutation;
    use crate::types::{EntityType, Payload};

    fn sample_op() -> PendingOperation {
        PendingOperation::from_mutation(
            OperationId::generate(),
            3,
            Mutation::create(EntityType::HealthRecord, Payload::new(b"{\"bp\":120}".to_vec())),
        )
    }

    #[test]
    fn crc32_known_vector() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn record_type_bytes() {
        for b in 1..=6u8 {
            let ty = RecordType::from_byte(b).unwrap();
            assert_eq!(ty.as_byte(), b);
        }
        assert!(RecordType::from_byte(0).is_none());
        assert!(RecordType::from_byte(7).is_none());
    }

    #[test]
    fn envelope_layout() {
        let record = QueueRecord::removed(OperationId::generate());
        let data = record.encode().unwrap();

        assert_eq!(&data[0..4], b"MSQL");
        assert_eq!(u16::from_le_bytes([data[4], data[5]]), LOG_VERSION);
        assert_eq!(data[6], RecordType::Removed.as_byte());
        let len = u32::from_le_bytes([data[7], data[8], data[9], data[10]]) as usize;
        assert_eq!(data.len(), HEADER_SIZE + len + CRC_SIZE);

        let crc_at = data.len() - CRC_SIZE;
        let stored = u32::from_le_bytes([
            data[crc_at],
            data[crc_at + 1],
            data[crc_at + 2],
            data[crc_at + 3],
        ]);
        assert_eq!(stored, compute_crc32(&data[..crc_at]));
    }

    #[test]
    fn enqueued_body_keeps_operation() {
        let op = sample_op();
        let record = QueueRecord::Enqueued(op.clone());
        let body = record.encode_body().unwrap();
        let decoded = QueueRecord::decode_body(RecordType::Enqueued, &body).unwrap();
        assert_eq!(decoded, QueueRecord::Enqueued(op));
    }

    #[test]
    fn failed_body_carries_reason() {
        let id = OperationId::generate();
        let record = QueueRecord::failed(id, 5, FailureKind::Transient, "timed out");
        let body = record.encode_body().unwrap();
        match QueueRecord::decode_body(RecordType::Failed, &body).unwrap() {
            QueueRecord::Failed(change) => {
                assert_eq!(change.id, id);
                assert_eq!(change.attempts, Some(5));
                assert_eq!(change.failure, Some(FailureKind::Transient));
                assert_eq!(change.error.as_deref(), Some("timed out"));
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn older_bodies_without_optional_fields_decode() {
        // A status change written before `attempts`/`failure`/`error` existed.
        #[derive(Serialize)]
        struct V0Change {
            id: OperationId,
            at: Timestamp,
        }
        let id = OperationId::generate();
        let mut body = Vec::new();
        ciborium::into_writer(
            &V0Change {
                id,
                at: Timestamp::from_millis(7),
            },
            &mut body,
        )
        .unwrap();

        let decoded = QueueRecord::decode_body(RecordType::Requeued, &body).unwrap();
        assert_eq!(decoded.operation_id(), id);
    }

    #[test]
    fn garbage_body_is_codec_error() {
        let result = QueueRecord::decode_body(RecordType::Enqueued, &[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CoreError::Codec { .. })));
    }
}
