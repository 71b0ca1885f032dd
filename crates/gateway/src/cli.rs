//! Command-line surface for the `memrelay` binary.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use mr_domain::config::{Config, ConfigSeverity};

#[derive(Debug, Parser)]
#[command(name = "memrelay", about = "Stateful memory middleware for voice agents")]
pub struct Cli {
    /// Path to the TOML config file. Falls back to $MEMRELAY_CONFIG,
    /// then ./memrelay.toml, then built-in defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the webhook server (default).
    Serve,
    /// Config inspection commands.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version and exit.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and exit non-zero on errors.
    Validate,
    /// Print the effective config (defaults applied) as TOML.
    Show,
}

/// Load the config file, applying defaults when none exists.
pub fn load_config(cli_path: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let path = cli_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("MEMRELAY_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("memrelay.toml"));

    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file found, using defaults");
        return Ok((Config::default(), path));
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok((config, path))
}

/// `memrelay config validate` — print every issue, return overall pass.
pub fn validate(config: &Config, path: &Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: OK", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

/// `memrelay config show` — effective config with defaults applied.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
