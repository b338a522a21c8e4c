//! Rewinder CLI - headless driver for play / pause / rewind sessions
//!
//! # Commands
//!
//! - `rewinder run` - Drive a session with synthetic refresh timestamps
//! - `rewinder config` - Print or write the effective configuration
//!
//! # Usage
//!
//! ```bash
//! # Ten seconds of the built-in demo program
//! rewinder run
//!
//! # Stall for two seconds at t=3, then pause and auto-rewind at t=6
//! rewinder run --stall-at 3 --stall-for 2 --rewind-at 6 --rewind-for 1.5
//!
//! # Save the last frame and print statistics as JSON
//! rewinder run program.rwp --png last.png --json
//! ```

mod config_cmd;
mod run;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Rewinder CLI - headless driver for play / pause / rewind sessions
#[derive(Parser)]
#[command(name = "rewinder")]
#[command(about = "Headless driver for Rewinder sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a session with synthetic timestamps and report statistics
    Run(run::RunArgs),

    /// Print or write the effective configuration
    Config(config_cmd::ConfigArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run::execute(args),
        Commands::Config(args) => config_cmd::execute(args),
    }
}
