//! offsync CLI
//!
//! Command-line tools for inspecting and repairing an offsync store.
//!
//! # Commands
//!
//! - `inspect` - Display sync metadata and queue statistics
//! - `queue` - List mutation queue items
//! - `retry-failed` - Make failed and parked items eligible again
//! - `gc` - Remove completed queue items
//! - `reset` - Forget entity type cursors to force a full resync
//! - `config-check` - Validate a TOML sync configuration

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// offsync command-line store tools.
#[derive(Parser)]
#[command(name = "offsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Path to a TOML sync configuration
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display sync metadata and queue statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List mutation queue items
    Queue {
        /// Only show items with this status (pending, processing, completed, failed, parked)
        #[arg(short, long)]
        status: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Make failed and parked items eligible again
    RetryFailed,

    /// Remove completed queue items
    Gc {
        /// Only remove items completed more than this many hours ago
        #[arg(long)]
        older_than_hours: Option<u64>,
    },

    /// Forget cursors so the next sync pulls in full
    Reset {
        /// Entity type to reset
        entity_type: Option<String>,

        /// Reset every entity type
        #[arg(short, long)]
        all: bool,
    },

    /// Validate a TOML sync configuration
    ConfigCheck {
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

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, config, &format)?;
        }
        Commands::Queue { status, format } => {
            let path = cli.path.ok_or("Store path required for queue")?;
            commands::queue::run(&path, config, status.as_deref(), &format)?;
        }
        Commands::RetryFailed => {
            let path = cli.path.ok_or("Store path required for retry-failed")?;
            commands::maintenance::retry_failed(&path, config)?;
        }
        Commands::Gc { older_than_hours } => {
            let path = cli.path.ok_or("Store path required for gc")?;
            commands::maintenance::gc(&path, config, older_than_hours)?;
        }
        Commands::Reset { entity_type, all } => {
            let path = cli.path.ok_or("Store path required for reset")?;
            commands::maintenance::reset(&path, config, entity_type.as_deref(), all)?;
        }
        Commands::ConfigCheck { format } => {
            let config = config.ok_or("Configuration path required for config-check")?;
            commands::config_check::run(config, &format)?;
        }
        Commands::Version => {
            println!("offsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("offsync engine v{}", offsync_engine::VERSION);
        }
    }

    Ok(())
}
