//! Retry and dismiss command implementations.

use super::open_existing;
use medsync_core::OperationId;
use std::path::Path;
use tracing::debug;

/// Runs the retry command.
///
/// Readmitted ops get a fresh attempt budget and are picked up by the next
/// drain of the running app.
pub fn run(path: &Path, id: Option<&str>, all: bool) -> Result<(), Box<dyn std::error::Error>> {
    let queue = open_existing(path)?;

    if all {
        let count = queue.retry_all()?;
        println!("Readmitted {count} failed operation(s)");
        return Ok(());
    }

    let id: OperationId = id.ok_or("Operation id required")?.parse()?;
    queue.retry(id)?;
    println!("Readmitted {id}");
    Ok(())
}

/// Runs the dismiss command.
pub fn dismiss(path: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let queue = open_existing(path)?;
    let id: OperationId = id.parse()?;
    queue.dismiss(id)?;
    debug!(%id, "failed operation dismissed");
    println!("Dismissed {id}");
    Ok(())
}
