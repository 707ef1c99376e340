//! Queue log writer.

use crate::error::{CoreError, CoreResult};
use crate::log::reader::{LogEntry, LogReader};
use crate::log::record::QueueRecord;
use medsync_storage::StorageBackend;
use tracing::warn;

/// Append-only, checksummed log of queue records.
///
/// A record is either fully in the log or not at all: if an append or the
/// following flush fails, the log is truncated back to where it was. If
/// that truncation fails too, the log is poisoned: every later write first
/// retries the truncation and fails with [`CoreError::LogPoisoned`] until
/// it succeeds, so no record ever lands behind torn bytes.
pub struct QueueLog {
    backend: Box<dyn StorageBackend>,
    sync_on_write: bool,
    records_since_compaction: usize,
    torn_at: Option<u64>,
}

impl QueueLog {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend,
            sync_on_write,
            records_since_compaction: 0,
            torn_at: None,
        }
    }

    /// Appends a record and, if configured, flushes it.
    ///
    /// Returns the offset where the record was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written durably.
    pub fn append(&mut self, record: &QueueRecord) -> CoreResult<u64> {
        let data = record.encode()?;
        self.heal()?;
        let before = self.backend.size()?;

        let offset = match self.backend.append(&data) {
            Ok(offset) => offset,
            Err(e) => {
                self.roll_back(before);
                return Err(e.into());
            }
        };

        if self.sync_on_write {
            if let Err(e) = self.backend.flush() {
                self.roll_back(before);
                return Err(e.into());
            }
        }

        self.records_since_compaction += 1;
        Ok(offset)
    }

    fn roll_back(&mut self, size: u64) {
        if let Err(e) = self.backend.truncate(size) {
            warn!(error = %e, size, "failed to roll back partial queue record, log poisoned");
            self.torn_at = Some(size);
        }
    }

    /// Removes bytes left by a failed roll back.
    fn heal(&mut self) -> CoreResult<()> {
        let Some(offset) = self.torn_at else {
            return Ok(());
        };
        if self.backend.size()? > offset {
            if let Err(e) = self.backend.truncate(offset) {
                warn!(error = %e, offset, "queue log still poisoned");
                return Err(CoreError::LogPoisoned { offset });
            }
        }
        self.torn_at = None;
        Ok(())
    }

    /// Returns true if a partial record is still waiting to be removed.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.torn_at.is_some()
    }

    /// Reads every record, dropping an incomplete trailing record if one is
    /// found.
    ///
    /// # Errors
    ///
    /// Returns an error on corruption other than a torn tail.
    pub fn recover(&mut self) -> CoreResult<Vec<LogEntry>> {
        let (entries, torn) = {
            let mut reader = LogReader::new(self.backend.as_ref())?;
            let entries = reader.by_ref().collect::<CoreResult<Vec<_>>>()?;
            (entries, reader.torn_tail())
        };

        if let Some(offset) = torn {
            let size = self.backend.size()?;
            warn!(offset, dropped = size - offset, "discarding torn queue log tail");
            self.backend.truncate(offset)?;
        }

        self.records_since_compaction = entries.len();
        Ok(entries)
    }

    /// Atomically replaces the log with `records`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the backend replace fails; the old
    /// log is then left untouched.
    pub fn rewrite(&mut self, records: &[QueueRecord]) -> CoreResult<()> {
        let mut data = Vec::new();
        for record in records {
            data.extend(record.encode()?);
        }
        self.backend.replace(&data)?;
        self.torn_at = None;
        self.records_since_compaction = records.len();
        Ok(())
    }

    /// Current size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Records appended since the last compaction (or since open).
    #[must_use]
    pub fn records_since_compaction(&self) -> usize {
        self.records_since_compaction
    }

    /// Returns a reader over the current log content.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn reader(&self) -> CoreResult<LogReader<'_>> {
        LogReader::new(self.backend.as_ref())
    }
}
