//! Entigraph CLI
//!
//! Command-line tools for inspecting file-backed entigraph stores.
//!
//! # Commands
//!
//! - `inspect` - Display record counts, bookkeeping keys and audit bounds
//! - `dump` - Print the store as JSON
//! - `audit` - Print audit trail entries

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Entigraph command-line store tools.
#[derive(Parser)]
#[command(name = "entigraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the primary store file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Path to the audit store file
    #[arg(global = true, short, long)]
    audit_path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display record counts and bookkeeping state
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the store as JSON
    Dump {
        /// Print stored values verbatim, bookkeeping keys included
        #[arg(short, long)]
        raw: bool,

        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,
    },

    /// Print audit trail entries
    Audit {
        /// First index to print
        #[arg(long)]
        from: Option<u64>,

        /// Stop before this index
        #[arg(long)]
        to: Option<u64>,

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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let audit_path = cli.audit_path.as_deref();
    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, audit_path, &format)?;
        }
        Commands::Dump { raw, pretty } => {
            let path = cli.path.ok_or("Database path required for dump")?;
            commands::dump::run(&path, raw, pretty)?;
        }
        Commands::Audit { from, to, format } => {
            let path = cli.path.ok_or("Database path required for audit")?;
            commands::audit::run(&path, audit_path, from, to, &format)?;
        }
        Commands::Version => {
            println!("Entigraph CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Entigraph Core v{}", entigraph_core::VERSION);
        }
    }

    Ok(())
}
