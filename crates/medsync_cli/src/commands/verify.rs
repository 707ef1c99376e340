//! Verify command implementation.

use medsync_core::{LogReader, OperationId, QueueRecord};
use medsync_storage::FileBackend;
use std::collections::HashSet;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records that decoded cleanly.
    pub valid_records: usize,
    /// Offset of an incomplete trailing record.
    pub torn_tail: Option<u64>,
    /// Status records for ops with no live enqueue record before them.
    pub orphan_records: usize,
    /// Ops still in the queue at the end of the log.
    pub live_operations: usize,
    /// Fatal problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err("Queue file not found".into());
    }

    println!("Verifying queue log at {}", path.display());
    println!();

    let backend = FileBackend::open(path)?;
    let result = verify_log(&backend)?;
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Queue log verification passed");
        Ok(())
    } else {
        println!("✗ Queue log verification failed");
        Err("Verification failed".into())
    }
}

fn verify_log(backend: &FileBackend) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();
    let mut live: HashSet<OperationId> = HashSet::new();
    let mut reader = LogReader::new(backend)?;

    for entry in reader.by_ref() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                result.errors.push(e.to_string());
                break;
            }
        };
        result.valid_records += 1;

        match &entry.record {
            QueueRecord::Enqueued(op) => {
                live.insert(op.id);
            }
            QueueRecord::Removed(change) => {
                if !live.remove(&change.id) {
                    result.orphan_records += 1;
                }
            }
            other => {
                if !live.contains(&other.operation_id()) {
                    result.orphan_records += 1;
                }
            }
        }
    }

    result.torn_tail = reader.torn_tail();
    result.live_operations = live.len();
    Ok(result)
}

fn print_result(result: &VerifyResult) {
    println!("  Valid records:   {}", result.valid_records);
    println!("  Live operations: {}", result.live_operations);
    if result.orphan_records > 0 {
        println!(
            "  Warning: {} record(s) refer to unknown operations (ignored on open)",
            result.orphan_records
        );
    }
    if let Some(offset) = result.torn_tail {
        println!("  Warning: incomplete record at offset {offset} (truncated on open)");
    }
    for error in &result.errors {
        println!("  Error: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_core::{EntityType, Mutation, MutationQueue, Payload, QueueConfig};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_queue(path: &Path) {
        let queue = MutationQueue::open_path(path, QueueConfig::default().compact_after_records(0))
            .unwrap();
        let a = queue
            .enqueue(Mutation::create(EntityType::HealthRecord, Payload::new(b"a".to_vec())))
            .unwrap();
        queue
            .enqueue(Mutation::create(EntityType::UserProfile, Payload::new(b"b".to_vec())))
            .unwrap();
        queue.mark_syncing(a).unwrap();
        queue.mark_synced(a).unwrap();
    }

    #[test]
    fn clean_log_passes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.log");
        write_queue(&path);

        let result = verify_log(&FileBackend::open(&path).unwrap()).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.valid_records, 4);
        assert_eq!(result.live_operations, 1);
        assert_eq!(result.orphan_records, 0);
        assert!(result.torn_tail.is_none());
    }

    #[test]
    fn torn_tail_is_a_warning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.log");
        write_queue(&path);
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"MSQL\x01\x00").unwrap();
        drop(file);

        let result = verify_log(&FileBackend::open(&path).unwrap()).unwrap();
        assert!(result.is_ok());
        assert!(result.torn_tail.is_some());
    }

    #[test]
    fn mid_log_corruption_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.log");
        write_queue(&path);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[12] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let result = verify_log(&FileBackend::open(&path).unwrap()).unwrap();
        assert!(!result.is_ok());
    }
}
