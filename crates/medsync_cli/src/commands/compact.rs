//! Compact command implementation.

use super::{open_existing, open_snapshot};
use medsync_core::QueueRecord;
use std::path::Path;
use tracing::info;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Ops kept by the snapshot.
    pub live_operations: usize,
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction.
    pub bytes_after: u64,
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting queue log at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = if dry_run { analyze(path)? } else { compact(path)? };

    println!("Compaction Analysis:");
    println!("  Live operations: {}", stats.live_operations);
    println!();
    println!("  Size before: {} bytes", stats.bytes_before);
    println!("  Size after:  {} bytes", stats.bytes_after);
    let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        saved,
        if stats.bytes_before > 0 {
            (saved as f64 / stats.bytes_before as f64) * 100.0
        } else {
            0.0
        }
    );

    Ok(())
}

fn analyze(path: &Path) -> Result<CompactStats, Box<dyn std::error::Error>> {
    let queue = open_snapshot(path)?;
    let bytes_before = std::fs::metadata(path)?.len();
    let mut bytes_after = 0u64;
    for op in queue.list() {
        bytes_after += QueueRecord::Enqueued(op).encode()?.len() as u64;
    }
    Ok(CompactStats {
        live_operations: queue.len(),
        bytes_before,
        bytes_after,
    })
}

fn compact(path: &Path) -> Result<CompactStats, Box<dyn std::error::Error>> {
    let bytes_before = std::fs::metadata(path)?.len();
    let queue = open_existing(path)?;
    queue.compact()?;
    let bytes_after = queue.log_size()?;
    info!(bytes_before, bytes_after, "queue log compacted");
    Ok(CompactStats {
        live_operations: queue.len(),
        bytes_before,
        bytes_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_core::{EntityType, Mutation, MutationQueue, Payload, QueueConfig};
    use tempfile::TempDir;

    fn churned_queue(path: &Path) {
        let queue = MutationQueue::open_path(path, QueueConfig::default().compact_after_records(0))
            .unwrap();
        let keep = queue
            .enqueue(Mutation::create(EntityType::FamilyMember, Payload::new(b"kid".to_vec())))
            .unwrap();
        for _ in 0..5 {
            queue.mark_syncing(keep).unwrap();
            queue.mark_retrying(keep, "timeout").unwrap();
        }
    }

    #[test]
    fn dry_run_predicts_without_writing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.log");
        churned_queue(&path);
        let before = std::fs::read(&path).unwrap();

        let predicted = analyze(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(predicted.live_operations, 1);
        assert!(predicted.bytes_after < predicted.bytes_before);

        let actual = compact(&path).unwrap();
        assert_eq!(actual.bytes_after, predicted.bytes_after);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), actual.bytes_after);
    }
}
