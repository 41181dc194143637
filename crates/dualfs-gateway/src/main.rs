#![warn(missing_docs)]

//! DualFS gateway node tools

use anyhow::Result;
use clap::Parser;
use dualfs_gateway::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    tracing::info!("DualFS gateway node {} starting...", config.node_id);

    let stdout = std::io::stdout();
    cli.run(&config, &mut stdout.lock())
}
