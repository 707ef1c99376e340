//! MedSync CLI
//!
//! Command-line tools for inspecting and repairing a MedSync queue file.
//!
//! # Commands
//!
//! - `status` - Show queue counts and user-facing errors
//! - `list` - List queued operations with their badges
//! - `enqueue` - Queue a mutation by hand
//! - `retry` - Readmit failed operations to automatic retry
//! - `dismiss` - Remove a failed operation
//! - `dump-log` - Dump raw log records for debugging
//! - `verify` - Verify log framing and checksums
//! - `compact` - Rewrite the log as a snapshot

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// MedSync queue tools.
#[derive(Parser)]
#[command(name = "medsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the queue log file
    #[arg(global = true, short, long)]
    queue: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue counts and user-facing errors
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List queued operations
    List {
        /// Only show failed operations
        #[arg(long)]
        failed: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Queue a mutation
    Enqueue {
        /// Entity type (health_record, family_member, user_profile, file_upload)
        #[arg(short = 't', long = "type")]
        entity_type: String,

        /// Operation kind (create, update, delete)
        #[arg(short, long, default_value = "create")]
        kind: String,

        /// Target entity id (required for update and delete)
        #[arg(short, long)]
        entity: Option<String>,

        /// Read the payload from this file
        #[arg(long, conflicts_with = "data")]
        file: Option<PathBuf>,

        /// Use this string as the payload
        #[arg(long)]
        data: Option<String>,

        /// MIME type of the payload
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Readmit failed operations to automatic retry
    Retry {
        /// Operation id
        #[arg(required_unless_present = "all")]
        id: Option<String>,

        /// Retry every failed operation
        #[arg(short, long)]
        all: bool,
    },

    /// Remove a failed operation
    Dismiss {
        /// Operation id
        id: String,
    },

    /// Dump log records for debugging
    DumpLog {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify log framing and checksums
    Verify,

    /// Rewrite the log as a snapshot of the live queue
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Status { format } => {
            let path = cli.queue.ok_or("Queue path required for status")?;
            commands::status::run(&path, &format)?;
        }
        Commands::List { failed, format } => {
            let path = cli.queue.ok_or("Queue path required for list")?;
            commands::list::run(&path, failed, &format)?;
        }
        Commands::Enqueue {
            entity_type,
            kind,
            entity,
            file,
            data,
            content_type,
        } => {
            let path = cli.queue.ok_or("Queue path required for enqueue")?;
            let request = commands::enqueue::EnqueueRequest {
                entity_type,
                kind,
                entity,
                file,
                data,
                content_type,
            };
            commands::enqueue::run(&path, &request)?;
        }
        Commands::Retry { id, all } => {
            let path = cli.queue.ok_or("Queue path required for retry")?;
            commands::retry::run(&path, id.as_deref(), all)?;
        }
        Commands::Dismiss { id } => {
            let path = cli.queue.ok_or("Queue path required for dismiss")?;
            commands::retry::dismiss(&path, &id)?;
        }
        Commands::DumpLog { limit, format } => {
            let path = cli.queue.ok_or("Queue path required for dump-log")?;
            commands::dump_log::run(&path, limit, &format)?;
        }
        Commands::Verify => {
            let path = cli.queue.ok_or("Queue path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.queue.ok_or("Queue path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("MedSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Queue log format v{}", medsync_core::LOG_VERSION);
        }
    }

    Ok(())
}
