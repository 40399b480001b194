//! tidesync CLI
//!
//! Command-line tools for inspecting and repairing the persisted sync state
//! of an installation.
//!
//! # Commands
//!
//! - `status` - Show device identity, queue length and last full sync
//! - `dump-queue` - List pending operations
//! - `reset-identity` - Forget the device identity
//! - `clear-queue` - Drop every pending operation

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tidesync command-line state tools.
#[derive(Parser)]
#[command(name = "tidesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the state directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show device identity, queue length and last full sync
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List pending operations in queue order
    DumpQueue {
        /// Maximum number of operations to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Forget the device identity; a new one is generated on next start
    ResetIdentity {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// Drop every pending operation without sending it
    ClearQueue {
        /// Show what would be dropped without changing anything
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

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Status { format } => {
            let path = cli.path.ok_or("State directory required for status")?;
            runtime.block_on(commands::status::run(&path, &format))?;
        }
        Commands::DumpQueue { limit, format } => {
            let path = cli.path.ok_or("State directory required for dump-queue")?;
            runtime.block_on(commands::dump_queue::run(&path, limit, &format))?;
        }
        Commands::ResetIdentity { yes } => {
            let path = cli.path.ok_or("State directory required for reset-identity")?;
            runtime.block_on(commands::reset::identity(&path, yes))?;
        }
        Commands::ClearQueue { dry_run } => {
            let path = cli.path.ok_or("State directory required for clear-queue")?;
            runtime.block_on(commands::reset::queue(&path, dry_run))?;
        }
        Commands::Version => {
            println!("tidesync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
