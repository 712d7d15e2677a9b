mod migrations;
mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use danmuhub_core::{
    bootstrap::{init_database, load_config},
    logging,
};

use server::DanmuHubServer;

#[derive(Parser, Debug)]
#[command(name = "danmuhub", about = "Danmaku ingestion and serving server")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, env = "DANMUHUB_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("DanmuHub server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Initialize database and run migrations
    let pool = init_database(&config).await?;
    migrations::run_migrations(&pool).await?;

    // 4. Wire services and serve
    let server = DanmuHubServer::build(config, pool).await?;
    server.start().await?;

    Ok(())
}
