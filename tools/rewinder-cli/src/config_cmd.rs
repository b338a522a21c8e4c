//! Config command - show or persist the effective configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use rewinder_core::config::{self, SessionConfig};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Read this file instead of the platform config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the config file location and exit
    #[arg(long)]
    pub path: bool,

    /// Write the effective configuration to the platform config file
    #[arg(long)]
    pub write: bool,
}

/// Execute the config command
pub fn execute(args: ConfigArgs) -> Result<()> {
    if args.path {
        match config::config_dir() {
            Some(dir) => println!("{}", dir.join("config.toml").display()),
            None => anyhow::bail!("No config directory on this platform"),
        }
        return Ok(());
    }

    let effective = load(args.config.as_ref())?;
    if args.write {
        config::save(&effective).context("Failed to write config")?;
        if let Some(dir) = config::config_dir() {
            eprintln!("Wrote {}", dir.join("config.toml").display());
        }
    }
    print!("{}", effective.to_toml_string()?);
    Ok(())
}

/// Load `path` if given, otherwise the platform config (defaults if absent)
pub fn load(path: Option<&PathBuf>) -> Result<SessionConfig> {
    match path {
        Some(path) => config::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(config::load()),
    }
}
