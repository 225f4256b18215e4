//! Thin broadcast channels.
//!
//! The log, info, admin-panel, and chrome-observer channels share one
//! contract: accept an upgrade on their path pattern, greet with
//! `connection_ack`, and fan every published frame out to all
//! subscribers. Inbound client frames are ignored apart from updating
//! liveness.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::hub::{self, Frame};

/// Capacity of each channel's fan-out buffer.
const CHANNEL_CAPACITY: usize = 256;

/// One broadcast shell.
#[derive(Debug)]
pub struct BroadcastChannel {
    name: &'static str,
    tx: broadcast::Sender<String>,
}

impl BroadcastChannel {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { name, tx }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Publish a frame to every connected subscriber. Returns the
    /// receiver count.
    pub fn publish(&self, kind: &str, data: serde_json::Value) -> usize {
        let frame = Frame::new(kind, data).to_text();
        self.tx.send(frame).unwrap_or(0)
    }

    /// Subscribe without a socket (used by tests and in-process
    /// observers).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Drive one subscriber socket until it closes.
    pub async fn socket_loop(&self, server_id: &str, socket: WebSocket) {
        let mut rx = self.tx.subscribe();
        let (mut sink, mut stream) = socket.split();

        let ack = hub::connection_ack(server_id).to_text();
        if sink.send(Message::Text(ack.into())).await.is_err() {
            return;
        }
        debug!(channel = self.name, "subscriber connected");

        loop {
            tokio::select! {
                published = rx.recv() => match published {
                    Ok(frame) => {
                        if sink.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(channel = self.name, skipped, "slow subscriber skipped frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        trace!(channel = self.name, len = text.len(), "client frame ignored");
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(channel = self.name, error = %e, "subscriber receive error");
                        break;
                    }
                },
            }
        }
        debug!(channel = self.name, "subscriber disconnected");
    }
}

/// The four broadcast shells, ready to wire into the router.
#[derive(Debug)]
pub struct BroadcastHub {
    pub log: Arc<BroadcastChannel>,
    pub info: Arc<BroadcastChannel>,
    pub admin_panel: Arc<BroadcastChannel>,
    pub chrome_observer: Arc<BroadcastChannel>,
}

impl BroadcastHub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            log: Arc::new(BroadcastChannel::new("log")),
            info: Arc::new(BroadcastChannel::new("info")),
            admin_panel: Arc::new(BroadcastChannel::new("admin-panel")),
            chrome_observer: Arc::new(BroadcastChannel::new("chrome-observer")),
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_frames_reach_subscribers() {
        let ch = BroadcastChannel::new("log");
        let mut rx = ch.subscribe();
        let count = ch.publish("vcp_log", serde_json::json!({"line": "hello"}));
        assert_eq!(count, 1);
        let frame: Frame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame.kind, "vcp_log");
        assert_eq!(frame.data["line"], "hello");
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let ch = BroadcastChannel::new("info");
        assert_eq!(ch.publish("noop", serde_json::json!({})), 0);
    }

    #[test]
    fn hub_names_its_channels() {
        let hub = BroadcastHub::new();
        assert_eq!(hub.log.name(), "log");
        assert_eq!(hub.chrome_observer.name(), "chrome-observer");
    }
}
