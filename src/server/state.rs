//! Server state and hub protocol handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::config::ServerConfig;
use super::hub::Hub;
use crate::error::Result;
use crate::protocol::{Envelope, Inbound, ProtocolRouter, INSPECTION_READY, REVIEW_RESULT};

/// Application state shared across handlers
#[derive(Debug)]
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Connected review sessions
    pub hub: Arc<Hub>,
    /// Dispatch table for frames arriving on hub sessions
    pub router: Arc<ProtocolRouter>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(config: ServerConfig) -> Self {
        let hub = Arc::new(Hub::new(config.ping_period));
        let router = Arc::new(hub_protocols(&hub));

        Self {
            config,
            hub,
            router,
            start_time: Instant::now(),
        }
    }

    /// Get server uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Handlers the hub runs for frames sent by review clients.
///
/// - protocol 1: reply on the same session with the message plus the
///   review-finished suffix
/// - protocol 2: log the review result and relay it to every session
pub fn hub_protocols(hub: &Arc<Hub>) -> ProtocolRouter {
    let mut router = ProtocolRouter::new();

    router.register(INSPECTION_READY, |inbound: Inbound, data: Value| async move {
        let text = data.as_str().unwrap_or_default();
        tracing::info!(session = %inbound.origin, message = %text, "Client message");
        inbound.reply.send(&Envelope::echo_reply(text))
    });

    let relay = hub.clone();
    router.register(REVIEW_RESULT, move |inbound: Inbound, data: Value| {
        let hub = relay.clone();
        async move { relay_review_result(&hub, &inbound, data).await }
    });

    router
}

async fn relay_review_result(hub: &Hub, inbound: &Inbound, data: Value) -> Result<()> {
    tracing::info!(session = %inbound.origin, host = %inbound.host, result = %data, "Review result received");
    hub.broadcast(&Envelope::new(REVIEW_RESULT, data)).await?;
    Ok(())
}
