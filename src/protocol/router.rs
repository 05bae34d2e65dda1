//! Protocol id → handler dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use super::message::Envelope;
use crate::error::{Result, ReviewError};

/// Queue handle for replying on the connection a message arrived on.
///
/// Sends never block; the owning session drains the queue one write at a
/// time in submission order.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<String>,
}

impl Outbox {
    /// Wrap a session's outbound queue
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Queue an envelope for delivery
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        self.send_text(envelope.to_text()?)
    }

    /// Queue an already serialized frame
    pub fn send_text(&self, text: String) -> Result<()> {
        self.tx
            .send(text)
            .map_err(|_| ReviewError::Transport("session queue closed".into()))
    }
}

/// Where an inbound message came from.
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Host tag of the connection that produced the message
    pub host: String,
    /// Connection identifier (endpoint key or hub session id)
    pub origin: String,
    /// Reply path to the same connection
    pub reply: Outbox,
}

/// Result of a single dispatch.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A handler ran to completion
    Handled,
    /// No handler is registered for the id
    NoHandler,
    /// The handler returned an error
    Failed(ReviewError),
}

type Handler = Arc<dyn Fn(Inbound, Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Maps protocol ids to handlers.
///
/// At most one handler per id; registering again replaces the previous one.
#[derive(Default)]
pub struct ProtocolRouter {
    handlers: HashMap<i64, Handler>,
}

impl std::fmt::Debug for ProtocolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.handlers.keys().collect();
        ids.sort();
        f.debug_struct("ProtocolRouter").field("ids", &ids).finish()
    }
}

impl ProtocolRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, returning `true` if one was replaced
    pub fn register<F, Fut>(&mut self, protocol_id: i64, handler: F) -> bool
    where
        F: Fn(Inbound, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |inbound, data| Box::pin(handler(inbound, data)));
        self.handlers.insert(protocol_id, handler).is_some()
    }

    /// Run the handler for `protocol_id`.
    ///
    /// Missing handlers and handler errors are logged and reported through
    /// the outcome, never propagated.
    pub async fn dispatch(&self, inbound: Inbound, protocol_id: i64, data: Value) -> DispatchOutcome {
        let Some(handler) = self.handlers.get(&protocol_id).cloned() else {
            tracing::warn!(
                protocol_id,
                host = %inbound.host,
                origin = %inbound.origin,
                "No handler found for protocol"
            );
            return DispatchOutcome::NoHandler;
        };

        match handler(inbound, data).await {
            Ok(()) => DispatchOutcome::Handled,
            Err(e) => {
                tracing::error!(protocol_id, error = %e, "Protocol handler failed");
                DispatchOutcome::Failed(e)
            },
        }
    }

    /// Decode a text frame and dispatch it.
    ///
    /// Returns `None` when the frame was dropped as undecodable.
    pub async fn dispatch_text(&self, inbound: Inbound, text: &str) -> Option<DispatchOutcome> {
        match Envelope::decode(text) {
            Ok(envelope) => Some(self.dispatch(inbound, envelope.protocol_id, envelope.data).await),
            Err(e) => {
                tracing::warn!(origin = %inbound.origin, error = %e, "Dropping undecodable frame");
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn inbound() -> (Inbound, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Inbound {
                host: "10.0.0.1".into(),
                origin: "10.0.0.1:8194".into(),
                reply: Outbox::new(tx),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_dispatch_passes_host() {
        let mut router = ProtocolRouter::new();
        router.register(1, |inbound: Inbound, data: Value| async move {
            inbound.reply.send(&Envelope::new(2, json_host(&inbound, &data)))
        });

        let (inbound, mut rx) = inbound();
        let outcome = router.dispatch(inbound, 1, Value::from("x")).await;
        assert!(matches!(outcome, DispatchOutcome::Handled));

        let reply = Envelope::decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply.data, "10.0.0.1/x");
    }

    fn json_host(inbound: &Inbound, data: &Value) -> Value {
        Value::from(format!("{}/{}", inbound.host, data.as_str().unwrap_or_default()))
    }

    #[tokio::test]
    async fn test_unknown_protocol_is_not_fatal() {
        let router = ProtocolRouter::new();
        let (inbound, _rx) = inbound();
        let outcome = router.dispatch(inbound, 42, Value::Null).await;
        assert!(matches!(outcome, DispatchOutcome::NoHandler));
    }

    #[tokio::test]
    async fn test_register_overwrites() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut router = ProtocolRouter::new();
        let counter = first.clone();
        assert!(!router.register(2, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }));
        let counter = second.clone();
        assert!(router.register(2, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }));

        let (inbound, _rx) = inbound();
        router.dispatch(inbound, 2, Value::Null).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_reported() {
        let mut router = ProtocolRouter::new();
        router.register(1, |_, _| async { Err(ReviewError::Protocol("bad payload".into())) });

        let (inbound, _rx) = inbound();
        let outcome = router.dispatch(inbound, 1, Value::Null).await;
        assert!(matches!(outcome, DispatchOutcome::Failed(ReviewError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_dispatch_text_drops_garbage() {
        let router = ProtocolRouter::new();
        let (inbound, _rx) = inbound();
        assert!(router.dispatch_text(inbound, "{oops").await.is_none());
    }
}
