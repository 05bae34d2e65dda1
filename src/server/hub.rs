//! Broadcast hub: registry of live review sessions.
//!
//! Membership changes and broadcast fan-out all take the same registry lock,
//! so a broadcast never delivers to a session that is halfway out. The lock
//! only guards the map and the non-blocking queue pushes; socket I/O happens
//! in each session's own task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::Result;
use crate::protocol::{Envelope, Inbound, Outbox, ProtocolRouter};

/// Registry entry for one connected session
#[derive(Debug)]
struct Member {
    /// Remote address, for logs
    peer: String,
    /// Outbound queue drained by the session task
    outbox: Outbox,
    /// Server-side close request
    close: Arc<Notify>,
}

/// Tracks every live WebSocket session and fans messages out to them.
#[derive(Debug)]
pub struct Hub {
    sessions: Mutex<HashMap<String, Member>>,
    ping_period: Duration,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(Duration::from_secs(54))
    }
}

impl Hub {
    /// Create an empty hub pinging idle sessions every `ping_period`
    pub fn new(ping_period: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ping_period,
        }
    }

    async fn join(&self, id: &str, member: Member) {
        let mut sessions = self.sessions.lock().await;
        tracing::info!(session = %id, peer = %member.peer, "Client registered");
        sessions.insert(id.to_string(), member);
    }

    /// Remove a session from the registry; returns whether it was present.
    pub async fn leave(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.remove(id) {
            Some(member) => {
                tracing::info!(session = %id, peer = %member.peer, "Client unregistered");
                true
            },
            None => false,
        }
    }

    /// Serialize once and queue the frame on every registered session.
    ///
    /// Returns the number of sessions the frame was queued on.
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<usize> {
        let text = envelope.to_text()?;
        Ok(self.broadcast_text(&text).await)
    }

    /// Queue an already serialized frame on every registered session.
    pub async fn broadcast_text(&self, text: &str) -> usize {
        let sessions = self.sessions.lock().await;
        tracing::info!(sessions = sessions.len(), message = %text, "Broadcasting message");

        let mut queued = 0;
        for (id, member) in sessions.iter() {
            match member.outbox.send_text(text.to_string()) {
                Ok(()) => queued += 1,
                Err(e) => tracing::debug!(session = %id, error = %e, "Session queue already closed"),
            }
        }
        queued
    }

    /// Ask one session to close from the server side.
    pub async fn disconnect(&self, id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.get(id) {
            Some(member) => {
                member.close.notify_one();
                true
            },
            None => false,
        }
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether no session is registered
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Ids of all registered sessions
    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Drive one upgraded socket until it fails, closes or is disconnected.
    ///
    /// Writes (queued frames and keepalive pings) go out one at a time in the
    /// order they were queued; inbound frames are dispatched in arrival order.
    pub async fn run_session(self: Arc<Self>, socket: WebSocket, peer: SocketAddr, router: Arc<ProtocolRouter>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, mut queue) = mpsc::unbounded_channel();
        let outbox = Outbox::new(tx);
        let close = Arc::new(Notify::new());

        self.join(
            &id,
            Member {
                peer: peer.to_string(),
                outbox: outbox.clone(),
                close: close.clone(),
            },
        )
        .await;

        let inbound = Inbound {
            host: peer.ip().to_string(),
            origin: id.clone(),
            reply: outbox,
        };

        let (mut sink, mut stream) = socket.split();
        let mut ping = interval_at(Instant::now() + self.ping_period, self.ping_period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = close.notified() => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        tracing::debug!(session = %id, error = %e, "Close frame not delivered");
                    }
                    break;
                }

                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(session = %id, %text, "Received frame");
                        router.dispatch_text(inbound.clone(), &text).await;
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(session = %id, "Peer closed connection");
                        break;
                    },
                    Some(Ok(_)) => {},
                    Some(Err(e)) => {
                        tracing::warn!(session = %id, peer = %peer, error = %e, "WebSocket read error");
                        break;
                    },
                },

                Some(text) = queue.recv() => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::warn!(session = %id, peer = %peer, error = %e, "WebSocket write error");
                        break;
                    }
                }

                _ = ping.tick() => {
                    if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                        tracing::warn!(session = %id, peer = %peer, error = %e, "WebSocket ping error");
                        break;
                    }
                }
            }
        }

        self.leave(&id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> (Member, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Member {
                peer: "127.0.0.1:50000".into(),
                outbox: Outbox::new(tx),
                close: Arc::new(Notify::new()),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_member() {
        let hub = Hub::default();
        let (a, mut rx_a) = member();
        let (b, mut rx_b) = member();
        hub.join("a", a).await;
        hub.join("b", b).await;

        let queued = hub.broadcast(&Envelope::new(1, "hello")).await.unwrap();
        assert_eq!(queued, 2);
        assert_eq!(rx_a.recv().await.unwrap(), r#"{"protocol_id":1,"data":"hello"}"#);
        assert_eq!(rx_b.recv().await.unwrap(), r#"{"protocol_id":1,"data":"hello"}"#);
    }

    #[tokio::test]
    async fn test_leave_stops_delivery() {
        let hub = Hub::default();
        let (a, _rx_a) = member();
        hub.join("a", a).await;
        assert_eq!(hub.len().await, 1);

        assert!(hub.leave("a").await);
        assert!(!hub.leave("a").await);
        assert!(hub.is_empty().await);
        assert_eq!(hub.broadcast_text("x").await, 0);
    }

    #[tokio::test]
    async fn test_closed_queue_is_skipped() {
        let hub = Hub::default();
        let (a, rx_a) = member();
        hub.join("a", a).await;
        drop(rx_a);
        assert_eq!(hub.broadcast_text("x").await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_signals_session() {
        let hub = Hub::default();
        let (a, _rx) = member();
        let close = a.close.clone();
        hub.join("a", a).await;

        assert!(hub.disconnect("a").await);
        assert!(!hub.disconnect("missing").await);
        tokio::time::timeout(Duration::from_secs(1), close.notified())
            .await
            .unwrap();
    }
}
