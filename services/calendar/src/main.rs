use anyhow::{Context, Result};
use calendar_service::api::{start_api_server, AppState};
use calendar_service::bucket::MediaBucket;
use calendar_service::capture_date::{CaptureDateCache, CaptureDateExtractor};
use calendar_service::config::Config;
use calendar_service::entries::EntryStore;
use calendar_service::index::IndexStore;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Memory Calendar Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let entries = Arc::new(
        EntryStore::new(&config.database)
            .await
            .context("Failed to initialize entry store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        entries
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let bucket = Arc::new(
        MediaBucket::new(&config.s3)
            .await
            .context("Failed to initialize media bucket client")?,
    );

    let cache = Arc::new(CaptureDateCache::new());
    let extractor = Arc::new(CaptureDateExtractor::new(
        bucket.clone(),
        cache.clone(),
        config.media.clone(),
    ));
    let index_store = Arc::new(IndexStore::new(bucket.clone(), &config.s3.processed_prefix));

    let state = AppState {
        config: Arc::new(config),
        entries,
        bucket,
        cache,
        extractor,
        index_store,
    };

    // Spawn API server task
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(state).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Calendar service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down calendar service");

    api_handle.abort();

    info!("Calendar service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
