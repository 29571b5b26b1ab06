//! Where a session's update events come from.

use async_trait::async_trait;
use fleetwatch_core::{UpdateBroadcaster, Vessel};
use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::TrackerError;

/// A live feed of merged vessel records.
///
/// The feed ending (`next_update` returning `None`) means the transport
/// closed. Dropping the subscription releases it.
pub struct Subscription {
    updates: BoxStream<'static, Vessel>,
}

impl Subscription {
    pub fn new(updates: impl Stream<Item = Vessel> + Send + 'static) -> Self {
        Self {
            updates: updates.boxed(),
        }
    }

    pub async fn next_update(&mut self) -> Option<Vessel> {
        self.updates.next().await
    }
}

/// Opens update subscriptions for the session controller.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn subscribe(&self) -> Result<Subscription, TrackerError>;
}

/// Subscribes straight to the in-process broadcaster.
pub struct BroadcastSource {
    broadcaster: UpdateBroadcaster,
}

impl BroadcastSource {
    pub fn new(broadcaster: UpdateBroadcaster) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl UpdateSource for BroadcastSource {
    async fn subscribe(&self) -> Result<Subscription, TrackerError> {
        let updates = self.broadcaster.subscribe().into_stream().map(|event| event.vessel);
        Ok(Subscription::new(updates))
    }
}

/// Subscribes to a stream endpoint over WebSocket.
pub struct WsUpdateSource {
    url: String,
}

impl WsUpdateSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl UpdateSource for WsUpdateSource {
    async fn subscribe(&self) -> Result<Subscription, TrackerError> {
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TrackerError::TransportClosed(format!("connect {}: {e}", self.url)))?;
        debug!(url = %self.url, "update stream connected");

        let updates = socket
            .take_while(|frame| future::ready(matches!(frame, Ok(msg) if !msg.is_close())))
            .filter_map(|frame| {
                future::ready(match frame {
                    Ok(Message::Text(text)) => decode_update(text.as_str()),
                    _ => None,
                })
            });

        Ok(Subscription::new(updates))
    }
}

fn decode_update(text: &str) -> Option<Vessel> {
    match serde_json::from_str(text) {
        Ok(vessel) => Some(vessel),
        Err(e) => {
            warn!(error = %e, "malformed update frame skipped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_core::{Imo, UpdateEvent};

    fn vessel(imo: u64) -> Vessel {
        Vessel {
            id: imo,
            name: format!("vessel-{imo}"),
            imo: Imo(imo),
            lat: 1.0,
            lng: 2.0,
            destination: "Hamburg".into(),
        }
    }

    #[tokio::test]
    async fn broadcast_source_relays_published_records() {
        let broadcaster = UpdateBroadcaster::new(16);
        let source = BroadcastSource::new(broadcaster.clone());
        let mut sub = source.subscribe().await.unwrap();

        broadcaster.publish(UpdateEvent::new(vessel(3), Vec::new()));

        assert_eq!(sub.next_update().await, Some(vessel(3)));
    }

    #[tokio::test]
    async fn broadcast_source_ends_when_broadcaster_is_gone() {
        let broadcaster = UpdateBroadcaster::new(16);
        let source = BroadcastSource::new(broadcaster.clone());
        let mut sub = source.subscribe().await.unwrap();

        drop(source);
        drop(broadcaster);

        assert_eq!(sub.next_update().await, None);
    }

    #[tokio::test]
    async fn ws_source_reports_connect_failure() {
        // Port 9 (discard) is essentially never listening for WebSocket upgrades.
        let source = WsUpdateSource::new("ws://127.0.0.1:9/ws");
        let err = source.subscribe().await.err().unwrap();
        assert_eq!(err.error_kind(), "transport_closed");
    }

    #[test]
    fn decode_skips_malformed_frames() {
        assert!(decode_update("not json").is_none());
        let json = serde_json::to_string(&vessel(11)).unwrap();
        assert_eq!(decode_update(&json), Some(vessel(11)));
    }
}
