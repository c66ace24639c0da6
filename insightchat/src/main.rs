//! insightchat - ask the analytics assistant from the terminal.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use insightchat::cli::{execute, load_config, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    execute(cli, config).await
}
