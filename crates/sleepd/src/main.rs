//! sleepd - background knowledge optimizer for a foreground agent.
//!
//! Reads observations as JSON lines on stdin and runs the sleep engine's
//! analysis loops against in-memory stores. Logs go to stderr.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
mod config;
mod provider;
mod run;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::from_default_env()
        .add_directive("sleepd=info".parse()?)
        .add_directive("sleep_core=info".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    match cli.command {
        Commands::Run => {
            let config = config::DaemonConfig::load(cli.config.as_deref())?;
            run::execute(config).await
        }
        Commands::Config => {
            let config = config::DaemonConfig::load(cli.config.as_deref())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Version => {
            println!("sleepd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
