//! Broadcast hub HTTP/WebSocket server.
//!
//! Routes:
//! - `GET /tasks?address=&model=&version=`: inspector notification,
//!   broadcast to every session as protocol 1
//! - `GET /setting`: acknowledgement echoing the Host header
//! - `GET /ws`: upgrade into a hub session
//! - `GET /health`: liveness and session count
//!
//! # Example
//!
//! ```rust,ignore
//! use minreview::server::{serve, ServerConfig};
//!
//! serve(ServerConfig::default().with_port(8194)).await?;
//! ```

mod config;
mod handlers;
mod hub;
mod state;

use std::sync::Arc;

pub use config::ServerConfig;
pub use handlers::{create_router, health_check, TasksQuery, TASKS_ACK};
pub use hub::Hub;
pub use state::{hub_protocols, AppState};

use crate::error::Result;
use crate::transport::TcpTransport;

/// Bind `config.addr` and run the hub until the listener fails.
pub async fn serve(config: ServerConfig) -> Result<()> {
    config.validate()?;
    let transport = TcpTransport::new(config.addr);
    let state = Arc::new(AppState::new(config));
    transport.serve(create_router(state)).await
}
