use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use fleetwatch_store::VesselStore;
use fleetwatch_telemetry::MetricsRecorder;
use fleetwatch_tracker::TrackerHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::client::{self, ClientRegistry};
use crate::event_bridge;
use crate::handlers;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    /// Lifetime queue-full drops before a stream client is disconnected.
    pub max_client_drops: u64,
    pub cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_send_queue: 256,
            max_client_drops: 100,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<VesselStore>,
    pub tracker: TrackerHandle,
    pub registry: Arc<ClientRegistry>,
    pub metrics: Arc<MetricsRecorder>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/ping", get(handlers::ping))
        .route("/fetch-vessels", get(handlers::fetch_vessels))
        .route("/track", post(handlers::track))
        .route(
            "/updated-vessel-information",
            post(handlers::updated_vessel_information),
        )
        .route("/tracking-status", get(handlers::tracking_status))
        .route("/metrics", get(handlers::metrics));

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws_handler))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener and start serving. The server stops accepting
/// connections once `shutdown` is cancelled.
pub async fn start(
    config: ServerConfig,
    store: Arc<VesselStore>,
    tracker: TrackerHandle,
    metrics: Arc<MetricsRecorder>,
    shutdown: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(
        ClientRegistry::new(config.max_send_queue, config.max_client_drops)
            .with_metrics(Arc::clone(&metrics)),
    );

    let bridge = event_bridge::create_bridge(Arc::clone(&registry), store.broadcaster().subscribe());
    let cleanup = client::start_cleanup_task(Arc::clone(&registry), config.cleanup_interval);

    let state = AppState {
        store,
        tracker,
        registry,
        metrics,
    };

    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "Fleetwatch server started");

    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Server terminated with error");
        }
        tracing::info!("Server stopped accepting connections");
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
        bridge,
        cleanup,
    })
}

/// Handle returned by `start()`: keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    server: JoinHandle<()>,
    bridge: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

impl ServerHandle {
    /// Wait for the server to finish its graceful shutdown, then stop the
    /// background tasks.
    pub async fn wait(self) {
        let _ = self.server.await;
        self.bridge.abort();
        self.cleanup.abort();
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.registry.register();
    tracing::info!(client_id = %client_id, clients = state.registry.count(), "WebSocket client connected");

    client::handle_ws_connection(socket, client_id, rx, state.registry).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_core::{Imo, UpdateBroadcaster, Vessel};
    use fleetwatch_tracker::{
        BroadcastSource, ContinuationSink, LogContinuation, SessionController, TrackerConfig,
        UpdateSource,
    };

    fn store() -> Arc<VesselStore> {
        let vessels = vec![Vessel {
            id: 1,
            name: "Aurora".into(),
            imo: Imo(9074729),
            lat: 59.9,
            lng: 10.7,
            destination: "Oslo".into(),
        }];
        Arc::new(VesselStore::new(vessels, UpdateBroadcaster::new(64)).unwrap())
    }

    fn tracker(store: &VesselStore, shutdown: CancellationToken) -> TrackerHandle {
        let source: Arc<dyn UpdateSource> =
            Arc::new(BroadcastSource::new(store.broadcaster().clone()));
        let sink: Arc<dyn ContinuationSink> = Arc::new(LogContinuation);
        SessionController::spawn(TrackerConfig::default(), source, sink, None, shutdown).0
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let shutdown = CancellationToken::new();
        let store = store();
        let tracker = tracker(&store, shutdown.clone());

        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        };
        let handle = start(
            config,
            store,
            tracker,
            Arc::new(MetricsRecorder::new()),
            shutdown.clone(),
        )
        .await
        .unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["vessels"], 1);
        assert_eq!(body["clients"], 0);

        shutdown.cancel();
        handle.wait().await;
    }

    #[tokio::test]
    async fn build_router_creates_routes() {
        let store = store();
        let state = AppState {
            tracker: tracker(&store, CancellationToken::new()),
            store,
            registry: Arc::new(ClientRegistry::new(32, 100)),
            metrics: Arc::new(MetricsRecorder::new()),
        };

        let _router = build_router(state);
    }
}
