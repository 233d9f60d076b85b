mod analyzer;
mod bot;
mod config;
mod line;
mod llm;
mod news;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::AppState;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stockbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded");
    info!("  Chat model: {}", config.openai.chat_model);
    info!("  Completion model: {}", config.openai.completion_model);
    info!("  News source: {}", config.news.source_url);

    // Create shared state and run the webhook server
    let state = Arc::new(AppState::new(config));

    info!("Bot is starting...");
    server::run(state).await?;

    Ok(())
}
