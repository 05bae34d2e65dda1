//! Transport layer for review sessions.
//!
//! - **Client side**: one resilient WebSocket session per hub [`Endpoint`],
//!   reconnecting forever at a fixed delay ([`client`], [`manager`]).
//! - **Server side**: a plain TCP listener serving the hub's axum router
//!   with peer addresses attached ([`TcpTransport`]).
//!
//! # Session State Machine
//!
//! ```text
//!                 connect ok
//!   [Connecting] ───────────> [Connected]
//!        ^  │                      │ read/write failure
//!        │  │ connect failed       v
//!        │  └──────────────> [Disconnected]
//!        │                         │
//!        │   fixed delay elapsed   v
//!        └─────────────── [ReconnectPending]
//!
//!   any state ── remove_connection() ──> [Removed]
//! ```

pub mod client;
pub mod manager;
mod tcp;

pub use client::{SessionConfig, SessionHandle};
pub use manager::SessionManager;
pub use tcp::TcpTransport;

use serde::{Deserialize, Serialize};

/// Remote hub address; identity key for exactly one client session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` key
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// WebSocket URL for the given handshake path
    pub fn ws_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("ws://{}:{}{}", self.host, self.port, path)
        } else {
            format!("ws://{}:{}/{}", self.host, self.port, path)
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("Endpoint must be host:port: {}", s))?;
        if host.is_empty() {
            return Err(format!("Endpoint host is empty: {}", s));
        }
        let port = port
            .parse()
            .map_err(|_| format!("Invalid endpoint port: {}", s))?;
        Ok(Self::new(host, port))
    }
}

/// Lifecycle state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Resolving, connecting and performing the WebSocket handshake
    Connecting,
    /// Handshake complete; frames flow in both directions
    Connected,
    /// A transport failure ended the connection
    Disconnected,
    /// Waiting out the fixed delay before the next attempt
    ReconnectPending,
    /// Explicitly removed; terminal
    Removed,
}

impl SessionState {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::ReconnectPending => "reconnect-pending",
            Self::Removed => "removed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
