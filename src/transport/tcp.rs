//! TCP transport for the hub.
//!
//! HTTP/1.1 over TCP using Axum's built-in server. Peer addresses are
//! attached to every request so `/tasks` can tag broadcasts with the
//! inspector's IP and hub sessions can be identified by remote address.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;

use crate::error::{Result, ReviewError};

/// TCP/HTTP transport using Axum's built-in server.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Address to listen on.
    listen_addr: SocketAddr,
}

impl TcpTransport {
    /// Create a new TCP transport.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self { listen_addr }
    }

    /// Bind and serve `router` until the server stops.
    pub async fn serve(&self, router: Router) -> Result<()> {
        let addr = self.listen_addr;
        tracing::info!("TCP transport listening on {}", addr);

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            ReviewError::Server(format!("Failed to bind TCP to {}: {}", addr, e))
        })?;

        Self::serve_on(listener, router).await
    }

    /// Serve `router` on an already bound listener.
    pub async fn serve_on(listener: TcpListener, router: Router) -> Result<()> {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| ReviewError::Server(format!("TCP server error: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serve_reports_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let transport = TcpTransport::new(taken.local_addr().unwrap());
        let err = transport.serve(Router::new()).await.unwrap_err();
        assert!(matches!(err, ReviewError::Server(_)));
    }
}
