//! Broadcast event bus.
//!
//! Advisory fan-out: publishing never blocks and never fails, a bus with
//! no subscribers simply drops the event. Receivers that fall behind the
//! channel capacity observe `Lagged` and skip ahead.

use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Typed broadcast bus for hub events.
#[derive(Debug)]
pub struct EventBus<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Create a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with an explicit capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns how many receivers got it; zero when nobody is listening.
    pub fn publish(&self, event: T) -> usize {
        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                trace!("event published with no receivers");
                0
            }
        }
    }

    /// Subscribe to all events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus: EventBus<String> = EventBus::new();
        let mut rx = bus.subscribe();
        assert_eq!(bus.publish("hello".into()), 1);
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus: EventBus<u32> = EventBus::new();
        assert_eq!(bus.publish(7), 0);
    }

    #[tokio::test]
    async fn clones_share_the_same_channel() {
        let bus: EventBus<u32> = EventBus::new();
        let cloned = bus.clone();
        let mut rx = bus.subscribe();
        cloned.publish(42);
        assert_eq!(rx.recv().await.unwrap(), 42);
    }
}
