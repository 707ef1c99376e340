//! Streaming queue log reader.

use crate::error::{CoreError, CoreResult};
use crate::log::record::{
    compute_crc32, QueueRecord, RecordType, CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION,
};
use medsync_storage::StorageBackend;

/// A decoded record and where it sits in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Offset of the record's first byte.
    pub offset: u64,
    /// Framed size in bytes.
    pub len: u64,
    /// The record.
    pub record: QueueRecord,
}

/// Iterates over the records of a queue log, one read per record.
///
/// # Error Handling
///
/// - An incomplete record at the end of the log (a write cut short by a
///   crash) ends iteration and is reported by [`LogReader::torn_tail`]
/// - A checksum mismatch on the final record is treated the same way
/// - A checksum mismatch anywhere else, bad magic, an unknown record type,
///   or an undecodable body is an error, after which iteration stops
/// - A record from a newer format version is an error
pub struct LogReader<'a> {
    backend: &'a dyn StorageBackend,
    offset: u64,
    size: u64,
    torn_at: Option<u64>,
    done: bool,
}

impl<'a> LogReader<'a> {
    /// Creates a reader positioned at the start of the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn new(backend: &'a dyn StorageBackend) -> CoreResult<Self> {
        Ok(Self {
            backend,
            offset: 0,
            size: backend.size()?,
            torn_at: None,
            done: false,
        })
    }

    /// Offset of an incomplete trailing record, once iteration has reached it.
    #[must_use]
    pub fn torn_tail(&self) -> Option<u64> {
        self.torn_at
    }

    /// Offset just past the last complete record read so far.
    #[must_use]
    pub fn valid_end(&self) -> u64 {
        self.offset
    }

    fn torn(&mut self) -> Option<CoreResult<LogEntry>> {
        self.torn_at = Some(self.offset);
        self.done = true;
        None
    }

    fn fail(&mut self, err: CoreError) -> Option<CoreResult<LogEntry>> {
        self.done = true;
        Some(Err(err))
    }

    fn read_next(&mut self) -> Option<CoreResult<LogEntry>> {
        let start = self.offset;
        let remaining = self.size - start;
        if remaining == 0 {
            self.done = true;
            return None;
        }
        if remaining < HEADER_SIZE as u64 {
            return self.torn();
        }

        let header = match self.backend.read_at(start, HEADER_SIZE) {
            Ok(h) => h,
            Err(e) => return self.fail(e.into()),
        };

        if header[0..4] != LOG_MAGIC {
            return self.fail(CoreError::log_corruption(start, "bad record magic"));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version == 0 {
            return self.fail(CoreError::log_corruption(start, "record version 0"));
        }
        if version > LOG_VERSION {
            return self.fail(CoreError::UnsupportedVersion {
                found: version,
                supported: LOG_VERSION,
            });
        }

        let Some(record_type) = RecordType::from_byte(header[6]) else {
            return self.fail(CoreError::log_corruption(
                start,
                format!("unknown record type {}", header[6]),
            ));
        };

        let body_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let total = (HEADER_SIZE + body_len + CRC_SIZE) as u64;
        if total > remaining {
            return self.torn();
        }

        let rest = match self.backend.read_at(start + HEADER_SIZE as u64, body_len + CRC_SIZE) {
            Ok(r) => r,
            Err(e) => return self.fail(e.into()),
        };
        let (body, crc_bytes) = rest.split_at(body_len);

        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let mut framed = header;
        framed.extend_from_slice(body);
        let actual = compute_crc32(&framed);
        if expected != actual {
            if start + total == self.size {
                return self.torn();
            }
            return self.fail(CoreError::ChecksumMismatch {
                offset: start,
                expected,
                actual,
            });
        }

        match QueueRecord::decode_body(record_type, body) {
            Ok(record) => {
                self.offset = start + total;
                Some(Ok(LogEntry {
                    offset: start,
                    len: total,
                    record,
                }))
            }
            Err(e) => self.fail(e),
        }
    }
}

impl Iterator for LogReader<'_> {
    type Item = CoreResult<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.read_next()
    }
}
