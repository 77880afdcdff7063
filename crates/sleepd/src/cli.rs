//! CLI argument definitions using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sleep daemon
///
/// Runs the background knowledge optimizer next to a foreground agent.
/// Observations are read from stdin as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "sleepd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short, global = true, env = "SLEEPD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON objects instead of text
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the engine and feed it observations from stdin until EOF or Ctrl-C
    Run,

    /// Print the effective configuration as TOML
    Config,

    /// Show version information
    Version,
}
