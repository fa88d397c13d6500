use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thinktest_ingest::cache::spawn_sweeper;
use thinktest_ingest::{create_app, logging, AppState, Config};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("THINKTEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    logging::init(&log_level)?;

    // Optional explicit config file
    let config = match std::env::var("THINKTEST_CONFIG").map(PathBuf::from) {
        Ok(path) => Config::load_from(&path)?,
        Err(_) => Config::load()?,
    };
    config.validate()?;
    if config.github.token.is_none() {
        warn!("No GitHub token configured, requests are limited to 60 per hour");
    }

    let bind_addr = config.server.bind_addr.clone();
    let sweep_interval = config.cache.sweep_interval();
    let state = AppState::from_config(config).await?;
    let sweeper = spawn_sweeper(state.github.clone(), sweep_interval);
    let limiter = Arc::clone(state.validation.rate_limiter());
    let janitor = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            limiter.cleanup().await;
        }
    });

    info!("ThinkTest ingestion server starting...");
    info!("Health check: http://{}/health", bind_addr);

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    janitor.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
