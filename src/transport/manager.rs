//! Endpoint → session registry for the review client.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};

use super::client::{SessionConfig, SessionHandle};
use super::{Endpoint, SessionState};
use crate::error::{Result, ReviewError};
use crate::protocol::{Envelope, ProtocolRouter};

/// Manages one resilient session per hub endpoint.
///
/// A session is created on the first `add_connection` for an endpoint and
/// lives until `remove_connection`; transient disconnects reuse it.
#[derive(Debug)]
pub struct SessionManager {
    router: Arc<ProtocolRouter>,
    config: SessionConfig,
    sessions: RwLock<HashMap<Endpoint, SessionHandle>>,
}

impl SessionManager {
    /// Create a manager dispatching inbound frames through `router`
    pub fn new(router: Arc<ProtocolRouter>, config: SessionConfig) -> Self {
        Self {
            router,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a session for `endpoint`; returns `false` if one already exists.
    pub async fn add_connection(&self, endpoint: Endpoint) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&endpoint) {
            tracing::warn!(%endpoint, "Connection already exists");
            return false;
        }

        let handle = SessionHandle::spawn(endpoint.clone(), self.config.clone(), self.router.clone());
        sessions.insert(endpoint, handle);
        true
    }

    /// Stop and forget the session for `endpoint`.
    pub async fn remove_connection(&self, endpoint: &Endpoint) -> bool {
        let handle = self.sessions.write().await.remove(endpoint);
        match handle {
            Some(handle) => {
                handle.close().await;
                true
            },
            None => false,
        }
    }

    /// Queue an envelope on the session for `endpoint`
    pub async fn send(&self, endpoint: &Endpoint, envelope: &Envelope) -> Result<()> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(endpoint).ok_or_else(|| {
            tracing::warn!(%endpoint, "No connection found");
            ReviewError::UnknownEndpoint(endpoint.key())
        })?;
        handle.send(envelope)
    }

    /// Current state of the session for `endpoint`
    pub async fn state(&self, endpoint: &Endpoint) -> Option<SessionState> {
        self.sessions.read().await.get(endpoint).map(SessionHandle::state)
    }

    /// State watch for the session for `endpoint`
    pub async fn subscribe(&self, endpoint: &Endpoint) -> Option<watch::Receiver<SessionState>> {
        self.sessions.read().await.get(endpoint).map(SessionHandle::subscribe)
    }

    /// All managed endpoints
    pub async fn endpoints(&self) -> Vec<Endpoint> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Remove every session
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.sessions.write().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.close().await;
        }
    }
}
