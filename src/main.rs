//! # fleetwatch
//!
//! Server binary: loads the vessel list, starts the session controller and
//! serves the HTTP/WebSocket API until Ctrl-C.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fleetwatch_core::UpdateBroadcaster;
use fleetwatch_store::VesselStore;
use fleetwatch_telemetry::init_telemetry;
use fleetwatch_tracker::{
    BroadcastSource, ContinuationSink, HttpContinuation, LogContinuation, SessionController,
    UpdateSource, WsUpdateSource,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli)?;

    let telemetry = init_telemetry(config.telemetry_config()?);
    let metrics = telemetry.metrics();
    tracing::info!(data = %config.data_path.display(), "Starting fleetwatch");

    let store = VesselStore::open(&config.data_path, UpdateBroadcaster::new(config.broadcast_capacity))
        .with_context(|| format!("failed to load vessels from {}", config.data_path.display()))?
        .with_metrics(Arc::clone(&metrics));
    let store = Arc::new(store);
    tracing::info!(vessels = store.len(), "Vessel store ready");

    let tracker_config = config.tracker_config();

    let source: Arc<dyn UpdateSource> = match &config.tracker.stream_url {
        Some(url) => {
            tracing::info!(url = %url, "Following remote update stream");
            Arc::new(WsUpdateSource::new(url.clone()))
        }
        None => Arc::new(BroadcastSource::new(store.broadcaster().clone())),
    };

    let sink: Arc<dyn ContinuationSink> = match &config.tracker.continuation_url {
        Some(url) => {
            tracing::info!(url = %url, "Continuation requests go upstream");
            Arc::new(HttpContinuation::new(url.clone(), tracker_config.continuation_timeout)?)
        }
        None => {
            tracing::info!("No continuation upstream configured, requests are logged only");
            Arc::new(LogContinuation)
        }
    };

    let shutdown = CancellationToken::new();
    let (tracker, controller) = SessionController::spawn(
        tracker_config,
        source,
        sink,
        Some(Arc::clone(&metrics)),
        shutdown.clone(),
    );

    let server = fleetwatch_server::start(
        config.server_config(),
        store,
        tracker,
        metrics,
        shutdown.clone(),
    )
    .await
    .context("failed to start server")?;

    tracing::info!(port = server.port, "Fleetwatch ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    shutdown.cancel();

    if tokio::time::timeout(Duration::from_secs(10), server.wait())
        .await
        .is_err()
    {
        tracing::warn!("Server did not drain within 10s");
    }
    join_controller(controller).await;
    Ok(())
}

/// Await the controller task, logging a panic or cancellation. Returns
/// whether it exited cleanly.
async fn join_controller(controller: JoinHandle<()>) -> bool {
    match controller.await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Session controller task failed");
            false
        }
    }
}
