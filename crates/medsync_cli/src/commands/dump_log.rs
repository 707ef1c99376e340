//! Dump log command implementation.

use medsync_core::{LogReader, QueueRecord};
use medsync_storage::FileBackend;
use serde::Serialize;
use std::path::Path;

/// Log record representation for output.
#[derive(Debug, Serialize)]
pub struct LogRecordInfo {
    /// Offset in the log file.
    pub offset: u64,
    /// Framed size in bytes.
    pub len: u64,
    /// Record type.
    pub record_type: String,
    /// Operation the record is about.
    pub operation_id: String,
    /// Target entity (enqueue records only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Operation kind (enqueue records only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Enqueue sequence (enqueue records only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Payload size in bytes (enqueue records only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<usize>,
    /// Status of the operation as recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Failure class (failed records only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Attempt count carried by the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Error text carried by the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogRecordInfo {
    fn new(offset: u64, len: u64, record: &QueueRecord) -> Self {
        let mut info = Self {
            offset,
            len,
            record_type: record.record_type().name().to_string(),
            operation_id: record.operation_id().to_string(),
            entity: None,
            kind: None,
            sequence: None,
            payload_size: None,
            status: None,
            failure: None,
            attempts: None,
            error: None,
        };
        match record {
            QueueRecord::Enqueued(op) => {
                info.entity = Some(op.entity_key().to_string());
                info.kind = Some(op.kind.to_string());
                info.sequence = Some(op.sequence);
                info.payload_size = Some(op.payload.len());
                info.status = Some(op.status.to_string());
                info.failure = op.failure.map(|f| f.to_string());
                info.attempts = Some(op.sync_attempts);
                info.error = op.error_message.clone();
            }
            QueueRecord::Attempted(change)
            | QueueRecord::Retrying(change)
            | QueueRecord::Failed(change)
            | QueueRecord::Removed(change)
            | QueueRecord::Requeued(change) => {
                info.attempts = change.attempts;
                info.failure = change.failure.map(|f| f.to_string());
                info.error = change.error.clone();
            }
        }
        info
    }
}

/// Runs the dump-log command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err("Queue file not found".into());
    }

    let backend = FileBackend::open(path)?;
    let (records, torn) = read_records(&backend, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
            if let Some(offset) = torn {
                println!();
                println!("Incomplete record at offset {offset} (will be truncated on open)");
            }
        }
    }

    Ok(())
}

fn read_records(
    backend: &FileBackend,
    limit: Option<usize>,
) -> Result<(Vec<LogRecordInfo>, Option<u64>), Box<dyn std::error::Error>> {
    let max_records = limit.unwrap_or(usize::MAX);
    let mut reader = LogReader::new(backend)?;
    let mut records = Vec::new();

    while records.len() < max_records {
        match reader.next() {
            Some(entry) => {
                let entry = entry?;
                records.push(LogRecordInfo::new(entry.offset, entry.len, &entry.record));
            }
            None => break,
        }
    }

    Ok((records, reader.torn_tail()))
}

fn print_text_output(records: &[LogRecordInfo]) {
    println!(
        "{:>10}  {:>6}  {:<10}  {:<36}  DETAILS",
        "OFFSET", "LEN", "TYPE", "OPERATION"
    );
    for r in records {
        let mut details = Vec::new();
        if let Some(kind) = &r.kind {
            details.push(kind.clone());
        }
        if let Some(entity) = &r.entity {
            details.push(entity.clone());
        }
        if let Some(seq) = r.sequence {
            details.push(format!("seq={seq}"));
        }
        if let Some(size) = r.payload_size {
            details.push(format!("{size}B"));
        }
        if let Some(status) = &r.status {
            details.push(status.clone());
        }
        if let Some(failure) = &r.failure {
            details.push(format!("failure={failure}"));
        }
        if let Some(attempts) = r.attempts {
            details.push(format!("attempts={attempts}"));
        }
        if let Some(error) = &r.error {
            details.push(format!("error={error:?}"));
        }
        println!(
            "{:>10}  {:>6}  {:<10}  {:<36}  {}",
            r.offset,
            r.len,
            r.record_type,
            r.operation_id,
            details.join(" ")
        );
    }
    println!();
    println!("{} record(s)", records.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_core::{EntityType, Mutation, MutationQueue, Payload, QueueConfig};
    use tempfile::TempDir;

    #[test]
    fn dumps_enqueue_and_status_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.log");
        let queue = MutationQueue::open_path(&path, QueueConfig::default()).unwrap();
        let id = queue
            .enqueue(Mutation::create(EntityType::HealthRecord, Payload::new(b"{}".to_vec())))
            .unwrap();
        queue.mark_syncing(id).unwrap();
        queue.mark_retrying(id, "connection reset").unwrap();
        drop(queue);

        let backend = FileBackend::open(&path).unwrap();
        let (records, torn) = read_records(&backend, None).unwrap();
        assert!(torn.is_none());
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sequence, Some(0));
        assert_eq!(records[0].payload_size, Some(2));
        assert_eq!(records[2].error.as_deref(), Some("connection reset"));
        assert!(records.iter().all(|r| r.operation_id == id.to_string()));

        let (limited, _) = read_records(&backend, Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }
}
