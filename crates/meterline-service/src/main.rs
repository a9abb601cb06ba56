//! Meterline Service - credits ledger and settlement engine.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meterline_service::{create_router, AppState, ServiceConfig};
use meterline_store::{MemoryStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,meterline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Meterline Service");

    let config = ServiceConfig::from_env()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = ?config.data_dir,
        token_ratio = %config.token_ratio,
        mail_configured = config.mail_api_url.is_some(),
        webhook_signed = config.payment_webhook_secret.is_some(),
        settlement_max_attempts = config.settlement.max_attempts,
        "Service configuration loaded"
    );

    let store = open_store(&config)?;
    let state = AppState::new(store, config.clone());
    let queue = Arc::clone(&state.queue);

    let app = create_router(state);

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    queue.shutdown().await;
    tracing::info!("Meterline Service stopped");
    Ok(())
}

#[cfg(feature = "rocksdb-backend")]
fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    if let Some(path) = &config.data_dir {
        tracing::info!(path = %path, "Opening RocksDB store");
        return Ok(Arc::new(meterline_store::RocksStore::open(path)?));
    }
    tracing::warn!("DATA_DIR not set - using the in-memory store, data is lost on restart");
    Ok(Arc::new(MemoryStore::new()))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    if config.data_dir.is_some() {
        tracing::warn!("DATA_DIR ignored: built without the rocksdb-backend feature");
    }
    tracing::warn!("Using the in-memory store, data is lost on restart");
    Ok(Arc::new(MemoryStore::new()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
