//! Eddy CLI - Harness for the Eddy ingestion buffer.
//!
//! Runs synthetic producer/worker workloads against a buffer configuration
//! and shows the effective configuration. Useful for sizing memory budgets
//! and flush thresholds before wiring the buffer into a connector.

mod commands;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Eddy ingestion buffer tool.
///
/// A command-line interface for exercising and inspecting Eddy buffer
/// configurations.
#[derive(Parser)]
#[command(name = "eddy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Buffer configuration file (JSON); unset fields keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Suppress progress and info messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

/// Output format options.
#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table format (default for TTY)
    #[default]
    Table,
    /// Machine-readable JSON format
    Json,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic workload through the buffer
    Simulate(commands::simulate::SimulateArgs),

    /// Show the effective buffer configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else if !cli.quiet {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    let result = commands::load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Simulate(args) => commands::simulate::run(&args, config, cli.format, cli.quiet),
        Commands::Config => commands::config::run(&config, cli.format, cli.quiet),
    });

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
