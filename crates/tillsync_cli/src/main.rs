//! tillsync CLI
//!
//! Command-line tools for looking inside a device's local store.
//!
//! # Commands
//!
//! - `inspect` - Display outbox statistics and the remote watermark
//! - `dump-outbox` - Dump outbox records for debugging
//! - `tombstones` - List soft-deleted rows and whether they may be purged

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tillsync command-line store tools.
#[derive(Parser)]
#[command(name = "tillsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Device ID to open the store as
    #[arg(global = true, short, long, default_value = "tillsync-cli")]
    device: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display outbox statistics and the remote watermark
    Inspect {
        /// List records the remote rejected
        #[arg(short, long)]
        rejected: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump outbox records for debugging
    DumpOutbox {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only show records still waiting to be pushed
        #[arg(long)]
        pending: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List soft-deleted rows
    Tombstones {
        /// Only show rows whose delete the remote confirmed
        #[arg(long)]
        purgeable: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { rejected, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            let store = commands::open_store(&path, &cli.device)?;
            commands::inspect::run(&store, &path, rejected, &format)?;
        }
        Commands::DumpOutbox {
            limit,
            pending,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for dump-outbox")?;
            let store = commands::open_store(&path, &cli.device)?;
            commands::dump_outbox::run(&store, limit, pending, &format)?;
        }
        Commands::Tombstones { purgeable, format } => {
            let path = cli.path.ok_or("Store path required for tombstones")?;
            let store = commands::open_store(&path, &cli.device)?;
            commands::tombstones::run(&store, purgeable, &format)?;
        }
        Commands::Version => {
            println!("tillsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Sync protocol v{}", tillsync_protocol::PROTOCOL_VERSION);
        }
    }

    Ok(())
}
