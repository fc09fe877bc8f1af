use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use muxbridge::{logging, AppConfig, Cli, WebServer};
use muxbridge_control::TmuxCli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();
    let config = AppConfig::resolve(&cli)?;
    logging::init(config.log_level.as_deref(), cli.verbose);

    // Fail early if tmux is missing rather than on the first connection
    let version = TmuxCli::new(config.tmux_binary.clone())
        .version()
        .await
        .with_context(|| format!("Cannot run '{}'", config.tmux_binary))?;
    println!("{} {}", "Using".dimmed(), version.bold());
    log::debug!("Configuration: {:?}", config);

    WebServer::new(config).start().await
}
