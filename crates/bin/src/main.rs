//! Bulletverse - headless dedicated server binary

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Bulletverse Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = server::Config::load(CONFIG_PATH)?;
    info!("Loaded configuration from {}", CONFIG_PATH);
    info!("  Port: {}", config.server.port);
    info!("  Arena: {}x{}", config.arena.width, config.arena.height);
    info!("  Tick rate: {} Hz", config.server.tick_rate);
    info!("  Drones: {} ({:?})", config.ai.count, config.ai.difficulty);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    server::run(config, shutdown).await?;

    Ok(())
}
