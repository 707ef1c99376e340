//! Status command implementation.

use super::open_snapshot;
use medsync_engine::{ConnectivityMonitor, StatusReporter, SyncStatus};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Runs the status command.
///
/// The CLI never talks to the remote, so connectivity is reported offline
/// and no drain is ever in progress.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let queue = Arc::new(open_snapshot(path)?);
    let stats = queue.stats();
    let log_size = std::fs::metadata(path)?.len();
    let reporter = StatusReporter::new(queue, ConnectivityMonitor::new(false, Duration::ZERO));
    let status = reporter.snapshot();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        _ => {
            println!("Queue: {}", path.display());
            println!("Log size: {log_size} bytes");
            println!();
            println!("Pending:  {}", stats.pending);
            println!("Syncing:  {}", stats.syncing);
            println!("Failed:   {}", stats.failed);
            println!("Total:    {}", stats.total());
            print_errors(&status);
        }
    }

    Ok(())
}

fn print_errors(status: &SyncStatus) {
    if status.errors.is_empty() {
        return;
    }
    println!();
    println!("Errors:");
    for error in &status.errors {
        println!("  - {error}");
    }
}
