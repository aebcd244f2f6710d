// src/main.rs - Runs the moderation core against the dry-run platform

use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::broadcast;

use modbot::config::StorageBackend;
use modbot::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Starting modbot v{}", modbot::VERSION);

    let config_path = BotConfiguration::path_from_env();
    let mut config = BotConfiguration::load(&config_path).await?;
    config.apply_env_overrides().context("Invalid environment override")?;

    let store: Arc<dyn Store> = match config.storage.backend {
        StorageBackend::File => {
            let store = JsonFileStore::open(&config.storage.data_dir)
                .await
                .with_context(|| format!("Failed to open data directory {}", config.storage.data_dir.display()))?;
            info!("Storing records under {}", store.root().display());
            Arc::new(store)
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage, pending temporary actions will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    // No transport is wired here; the dry-run platform logs every call
    let platform: Arc<dyn ModerationPlatform> = Arc::new(DryRunPlatform::new());

    let bot = Arc::new(ModBot::new(config, store, platform).await?);
    bot.start().await;

    let pending = bot.scheduler().pending().await?;
    info!("{} temporary actions pending", pending.len());

    // Transports publish into this channel
    let (events, receiver) = broadcast::channel::<PlatformEvent>(1024);
    let runner = Arc::clone(&bot);
    let event_loop = tokio::spawn(async move { runner.run(receiver).await });

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C signal, initiating graceful shutdown...");

    drop(events);
    if let Err(e) = event_loop.await {
        warn!("Event loop ended abnormally: {}", e);
    }
    bot.shutdown().await;

    Ok(())
}
