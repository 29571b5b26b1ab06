//! Fan-out of vessel updates to every live subscriber.
//!
//! Each subscriber reads through its own cursor into a shared ring of
//! `capacity` events. A subscriber that falls more than `capacity` events
//! behind loses the oldest ones (drop-oldest) and resumes from the oldest
//! retained event; publishers and other subscribers are never blocked.

use futures::Stream;
use tokio::sync::broadcast;

use crate::events::UpdateEvent;

pub const DEFAULT_CAPACITY: usize = 1024;

/// Publishing half of the update channel. Cheap to clone.
#[derive(Clone, Debug)]
pub struct UpdateBroadcaster {
    tx: broadcast::Sender<UpdateEvent>,
}

impl UpdateBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver an event to every live subscription. Returns the number of
    /// subscriptions it was queued for.
    pub fn publish(&self, event: UpdateEvent) -> usize {
        // Err only means nobody is listening right now.
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> UpdateSubscription {
        UpdateSubscription {
            rx: self.tx.subscribe(),
            skipped: 0,
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for UpdateBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One subscriber's view of the update channel.
pub struct UpdateSubscription {
    rx: broadcast::Receiver<UpdateEvent>,
    skipped: u64,
}

impl UpdateSubscription {
    /// Next event in publish order, or `None` once every broadcaster handle is gone.
    pub async fn recv(&mut self) -> Option<UpdateEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.skipped += n;
                    tracing::warn!(skipped = n, "Update subscriber lagged, dropped oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<UpdateEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.skipped += n;
                    tracing::warn!(skipped = n, "Update subscriber lagged, dropped oldest events");
                }
                Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => {
                    return None;
                }
            }
        }
    }

    /// Total events this subscriber lost to the drop-oldest policy.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Release the subscription. Equivalent to dropping it.
    pub fn unsubscribe(self) {}

    pub fn into_stream(self) -> impl Stream<Item = UpdateEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }
}
