//! List command implementation.

use super::open_snapshot;
use medsync_core::OperationStatus;
use medsync_engine::{ConnectivityMonitor, ItemStatus, StatusReporter};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Runs the list command.
pub fn run(path: &Path, failed_only: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let queue = Arc::new(open_snapshot(path)?);
    let reporter = StatusReporter::new(queue, ConnectivityMonitor::new(false, Duration::ZERO));
    let items = select(reporter.items(), failed_only);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        _ => print_text_output(&items),
    }

    Ok(())
}

fn select(items: Vec<ItemStatus>, failed_only: bool) -> Vec<ItemStatus> {
    if !failed_only {
        return items;
    }
    items
        .into_iter()
        .filter(|item| item.status == OperationStatus::Failed)
        .collect()
}

fn print_text_output(items: &[ItemStatus]) {
    if items.is_empty() {
        println!("Queue is empty");
        return;
    }

    println!(
        "{:<36}  {:<8}  {:<8}  {:>8}  ENTITY",
        "ID", "KIND", "STATUS", "ATTEMPTS"
    );
    for item in items {
        println!(
            "{:<36}  {:<8}  {:<8}  {:>8}  {}",
            item.id,
            item.kind.as_str(),
            item.status.as_str(),
            item.sync_attempts,
            item.entity
        );
        if let Some(error) = &item.error {
            match item.failure {
                Some(failure) => println!("    {failure}: {error}"),
                None => println!("    {error}"),
            }
        }
    }
    println!();
    println!("{} operation(s)", items.len());
}
