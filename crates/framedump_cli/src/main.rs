//! framedump CLI
//!
//! Command-line maintenance tools for dump files.
//!
//! # Commands
//!
//! - `inspect` - Display dump statistics, schema, and attached indexes
//! - `verify` - Walk every frame and check that payloads decode
//! - `repair` - Salvage readable records from a damaged dump
//! - `prune` - Rewrite a dump offline, dropping tombstones

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// framedump command-line maintenance tools.
#[derive(Parser)]
#[command(name = "framedump")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the dump file
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
    /// Display dump statistics, schema, and attached indexes
    Inspect {
        /// Show the recorded schema fields
        #[arg(short, long)]
        schema: bool,

        /// Show discovered index files
        #[arg(short, long)]
        indexes: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Walk every frame and check that payloads decode
    Verify {
        /// Maximum number of errors to report
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Salvage readable records from a damaged dump
    Repair {
        /// Where to write the repaired dump
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Rewrite a dump offline, dropping tombstones
    Prune {
        /// Dry run - show what would be reclaimed
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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            schema,
            indexes,
            format,
        } => {
            let path = cli.path.ok_or("Dump path required for inspect")?;
            commands::inspect::run(&path, schema, indexes, &format)?;
        }
        Commands::Verify { limit } => {
            let path = cli.path.ok_or("Dump path required for verify")?;
            commands::verify::run(&path, limit)?;
        }
        Commands::Repair { output } => {
            let path = cli.path.ok_or("Dump path required for repair")?;
            commands::repair::run(&path, &output)?;
        }
        Commands::Prune { dry_run } => {
            let path = cli.path.ok_or("Dump path required for prune")?;
            commands::prune::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("framedump CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("framedump Core v{}", framedump_core::VERSION);
        }
    }

    Ok(())
}
