use ailimits_backend::api::{self, ApiState};
use ailimits_backend::config::BackendConfig;
use ailimits_backend::model::SystemClock;
use ailimits_backend::module::{Aggregator, SettingsWatcher};
use ailimits_backend::settings::SettingsStore;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = BackendConfig::load_or_default(&config_path)?;

    let _logging_guard =
        ailimits_backend::logging::init_logging(&config.log_dir, "ailimits-backend", &config.log_level)?;

    tracing::info!("AI limits backend starting...");
    tracing::info!("Configuration loaded from {}", config_path);

    let store = Arc::new(
        SettingsStore::load(&config.settings_path)
            .await
            .context("Failed to load provider settings")?,
    );
    let aggregator = Arc::new(Aggregator::new(store, Arc::new(SystemClock)).await?);
    tracing::info!(
        "Status cache ready (ttl {}s)",
        aggregator.cache_ttl().await.as_secs()
    );

    let poll_interval = Duration::from_secs(config.settings_poll_secs.max(1));
    let _watcher = aggregator
        .settings()
        .path()
        .map(|path| SettingsWatcher::new(path).spawn(aggregator.clone(), poll_interval));

    let app = api::router(ApiState::new(aggregator, config.identity_header.clone()));

    let addr = config.server_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("AI limits backend stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
