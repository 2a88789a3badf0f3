//! FieldSync CLI
//!
//! Command-line tools for a device's offline data directory.
//!
//! # Commands
//!
//! - `status` - Show engine status, cursor and counts
//! - `queue` - List pending mutations in push order
//! - `failed` - List mutations that reached the retry cap
//! - `retry` - Make failed mutations eligible again
//! - `clear` - Drop queued mutations without pushing them
//! - `conflicts` - List conflicts awaiting a decision
//! - `resolve` - Decide a deferred conflict
//! - `compact` - Rewrite journals without dead records

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// FieldSync offline data tools.
#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show engine status, cursor and counts
    Status,

    /// List pending mutations in push order
    Queue {
        /// Maximum number of items to list
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List mutations that reached the retry cap
    Failed,

    /// Make failed mutations eligible again
    Retry {
        /// Queue item id
        id: Option<u64>,

        /// Reset every failed item
        #[arg(short, long, conflicts_with = "id")]
        all: bool,
    },

    /// Drop queued mutations without pushing them
    Clear {
        /// Queue item id
        id: Option<u64>,

        /// Drop every queued item
        #[arg(short, long, conflicts_with = "id")]
        all: bool,
    },

    /// List conflicts awaiting a decision
    Conflicts {
        /// Include resolved conflicts
        #[arg(short, long)]
        all: bool,
    },

    /// Decide a deferred conflict
    Resolve {
        /// Conflict id
        id: String,

        /// Side to keep (local, server)
        #[arg(short, long)]
        keep: String,
    },

    /// Rewrite journals without dead records
    Compact,

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

    let format = commands::OutputFormat::parse(&cli.format)?;

    match cli.command {
        Commands::Status => {
            let path = cli.path.ok_or("Data path required for status")?;
            commands::status::run(&path, format)?;
        }
        Commands::Queue { limit } => {
            let path = cli.path.ok_or("Data path required for queue")?;
            commands::queue::list(&path, limit, format)?;
        }
        Commands::Failed => {
            let path = cli.path.ok_or("Data path required for failed")?;
            commands::queue::failed(&path, format)?;
        }
        Commands::Retry { id, all } => {
            let path = cli.path.ok_or("Data path required for retry")?;
            let target = commands::Target::from_args(id, all)?;
            commands::queue::retry(&path, target)?;
        }
        Commands::Clear { id, all } => {
            let path = cli.path.ok_or("Data path required for clear")?;
            let target = commands::Target::from_args(id, all)?;
            commands::queue::clear(&path, target)?;
        }
        Commands::Conflicts { all } => {
            let path = cli.path.ok_or("Data path required for conflicts")?;
            commands::conflicts::list(&path, all, format)?;
        }
        Commands::Resolve { id, keep } => {
            let path = cli.path.ok_or("Data path required for resolve")?;
            commands::conflicts::resolve(&path, &id, &keep)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Data path required for compact")?;
            commands::compact::run(&path)?;
        }
        Commands::Version => {
            println!("FieldSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("FieldSync engine v{}", fieldsync_engine::VERSION);
        }
    }

    Ok(())
}
