use std::sync::Arc;

use fleetwatch_core::UpdateSubscription;

use crate::client::ClientRegistry;

/// Forwards every published vessel update to connected stream clients.
pub struct EventBridge {
    registry: Arc<ClientRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Spawn the forwarding task. It ends when the broadcaster is dropped.
    pub fn start(&self, mut updates: UpdateSubscription) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            while let Some(event) = updates.recv().await {
                match event.to_wire() {
                    Ok(json) => {
                        let delivered = registry.broadcast(&json);
                        tracing::trace!(imo = %event.imo(), delivered, "Update forwarded");
                    }
                    Err(e) => {
                        tracing::error!(imo = %event.imo(), error = %e, "Failed to serialize update");
                    }
                }
            }
            tracing::info!(skipped = updates.skipped(), "Event bridge channel closed");
        })
    }
}

/// Create an event bridge wired to a broadcaster subscription.
pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    updates: UpdateSubscription,
) -> tokio::task::JoinHandle<()> {
    EventBridge::new(registry).start(updates)
}
