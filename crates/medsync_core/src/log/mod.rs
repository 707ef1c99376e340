//! Durable queue log.
//!
//! The mutation queue never overwrites state in place. Each enqueue and
//! each status transition is appended as a framed [`QueueRecord`]; the
//! current queue is whatever replaying the log produces. Compaction
//! rewrites the log as one `Enqueued` snapshot record per live operation.

mod reader;
mod record;
mod writer;

pub use reader::{LogEntry, LogReader};
pub use record::{compute_crc32, QueueRecord, RecordType, StatusChange, LOG_MAGIC, LOG_VERSION};
pub use writer::QueueLog;
