use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use fleetwatch_core::ClientId;
use fleetwatch_telemetry::MetricsRecorder;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// A connected stream subscriber.
pub struct Client {
    pub id: ClientId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
    /// Messages lost to a full queue over the client's lifetime.
    drops: AtomicU64,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
            drops: AtomicU64::new(0),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }

    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected stream clients.
///
/// Each client owns a bounded outbound queue. Fan-out never waits on a
/// client: a full queue loses that one message for that one client, and a
/// client that keeps losing messages is disconnected.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
    max_drops: u64,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize, max_drops: u64) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
            max_drops: max_drops.max(1),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a new client and return its ID + outbound queue.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients
            .insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        self.report_active();
        (id, rx)
    }

    /// Remove a client. Dropping its sender ends the connection's writer.
    pub fn unregister(&self, id: &ClientId) -> bool {
        let Some((_, client)) = self.clients.remove(id) else {
            return false;
        };
        client.connected.store(false, Ordering::Relaxed);
        self.report_active();
        true
    }

    pub fn get(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Offer a message to every connected client. Returns how many queued it.
    pub fn broadcast(&self, message: &str) -> usize {
        let mut delivered = 0;
        let mut evict = Vec::new();

        for entry in self.clients.iter() {
            let client = entry.value();
            if !client.is_connected() {
                continue;
            }
            match client.tx.try_send(message.to_owned()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let drops = client.drops.fetch_add(1, Ordering::Relaxed) + 1;
                    self.count_metric("ws.messages.dropped");
                    tracing::debug!(client_id = %client.id, drops, "Send queue full, dropping message");
                    if drops >= self.max_drops {
                        evict.push(client.id.clone());
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        // Removal has to wait until the iterator releases its shard locks.
        for id in evict {
            if self.unregister(&id) {
                tracing::warn!(client_id = %id, max_drops = self.max_drops, "Disconnecting slow client");
                self.count_metric("ws.clients.evicted");
            }
        }
        delivered
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Remove clients that haven't responded to pings within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in dead {
            if self.unregister(&id) {
                removed += 1;
                tracing::info!(client_id = %id, "Cleaned up dead client");
            }
        }
        removed
    }

    fn report_active(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.gauge_set("ws.clients.active", &[], self.clients.len() as f64);
        }
    }

    fn count_metric(&self, name: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc(name, &[], 1);
        }
    }
}

/// Drive one WebSocket connection until either side ends it.
///
/// The writer forwards the client's queue and sends a heartbeat ping. The
/// reader records pongs; inbound text has no meaning and is only logged.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        // Unregistered: evicted or timed out.
                        None => {
                            let _ = ws_tx.send(WsMessage::Close(None)).await;
                            break;
                        }
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "Sent ping");
                }
            }
        }
    });

    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    tracing::debug!(client_id = %reader_cid, len = text.as_str().len(), "Ignoring inbound client message");
                }
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.get(&reader_cid) {
                        client.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    registry.unregister(&client_id);
    tracing::info!(client_id = %client_id, "WebSocket client disconnected");
}

/// Start a background task that periodically cleans up dead clients.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed, "Dead client cleanup");
            }
        }
    })
}
