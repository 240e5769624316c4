use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use beacon_core::Config;
use beacon_discord::DiscordClient;
use beacon_server::ServerConfig;
use beacon_store::Database;

/// Account-link relay: WebSocket gateway + OAuth callback + notify API.
#[derive(Parser, Debug)]
#[command(name = "beacon", version)]
struct Cli {
    /// Override the listening port from the environment.
    #[arg(long)]
    port: Option<u16>,

    /// Override the SQLite database path.
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    tracing::info!("Starting beacon server");

    let db = Database::open(&config.database_path)?;
    let discord = Arc::new(DiscordClient::new(config.discord.clone()));

    let server_config = ServerConfig {
        port: config.port,
        allowed_origins: config.allowed_origins.clone(),
        ..Default::default()
    };

    let handle = beacon_server::start(server_config, db, discord, config.api_key.clone()).await?;
    tracing::info!(port = handle.port, "beacon ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    Ok(())
}
