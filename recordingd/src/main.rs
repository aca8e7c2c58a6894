mod api;
mod config;
mod error;
mod notify;
mod recordings;
mod session;
mod store;

use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::notify::NotificationPublisher;
use crate::recordings::mapping::LinkBuilder;
use crate::recordings::options::OptionsAssembler;
use crate::recordings::RecordingController;
use crate::session::loopback::LoopbackConnector;
use crate::session::ConnectionManager;
use crate::store::db::RecordingDb;
use crate::store::StoreHandle;

const NOTIFICATION_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("recordingd=info"))
        )
        .init();

    tracing::info!("Starting recordingd");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/recordingd/recordingd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let db = RecordingDb::open(&config.store.db_path)
        .with_context(|| format!("Failed to open database at {:?}", config.store.db_path))?;
    tracing::info!("Opened database at {:?}", config.store.db_path);

    // Store thread owns the connection from here on
    let store = StoreHandle::spawn(db);

    for target in &config.targets {
        let registered = store
            .upsert_target(target.connect_url.clone(), target.alias.clone())
            .await
            .with_context(|| format!("Failed to register target {}", target.connect_url))?;
        tracing::info!(
            "Registered target {} ({}) with {} active recordings",
            registered.id,
            registered.connect_url,
            registered.active_recordings.len()
        );
    }

    // Targets dropped from the config are gone, along with their recordings
    let configured: HashSet<&str> = config.targets.iter().map(|t| t.connect_url.as_str()).collect();
    for known in store.list_targets().await.context("Failed to list targets")? {
        if configured.contains(known.connect_url.as_str()) {
            continue;
        }
        store
            .delete_target(known.id)
            .await
            .with_context(|| format!("Failed to remove target {}", known.connect_url))?;
        tracing::info!(
            "Removed target {} ({}) and {} recordings no longer configured",
            known.id,
            known.connect_url,
            known.active_recordings.len()
        );
    }

    let cancel = CancellationToken::new();

    let publisher = NotificationPublisher::new(NOTIFICATION_CAPACITY);
    let logger_rx = publisher.subscribe();
    let logger_cancel = cancel.clone();
    let logger_handle = tokio::spawn(async move {
        if let Err(e) = notify::run_logger(logger_rx, logger_cancel).await {
            tracing::error!("Notification logger error: {}", e);
        }
    });

    tracing::warn!("No JMX connector available; targets are served by in-process loopback recorders");
    let connector = Arc::new(LoopbackConnector::new());
    let connections = Arc::new(ConnectionManager::new(connector, &config.connections));

    let controller = RecordingController::new(
        store.clone(),
        connections,
        publisher,
        OptionsAssembler::new(config.recordings.clone()),
        LinkBuilder::new(config.api.external_url.clone()),
    );
    let app = api::routes::router(api::routes::AppState {
        recordings: Arc::new(controller),
    });

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    let _ = tokio::join!(logger_handle, server_handle);

    if let Err(e) = store.shutdown().await {
        tracing::error!("Failed to shutdown store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
