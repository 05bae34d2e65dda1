//! Resilient WebSocket session to one hub endpoint.
//!
//! Each session is a single-owner actor task. The rest of the crate talks to
//! it only through a [`SessionHandle`]: an outbound queue, a state watch and
//! a shutdown signal. Inbound frames are dispatched inline, in arrival
//! order, before the next frame is read.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Endpoint, SessionState};
use crate::error::{Result, ReviewError};
use crate::protocol::{Envelope, Inbound, Outbox, ProtocolRouter};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Path used in the WebSocket handshake
    pub handshake_path: String,
    /// Fixed delay between a disconnect and the next attempt
    pub reconnect_delay: Duration,
    /// Upper bound for connect + handshake
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_path: "/ws".to_string(),
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    /// Set reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set handshake path
    pub fn with_handshake_path(mut self, path: &str) -> Self {
        self.handshake_path = path.to_string();
        self
    }
}

/// Owner-side handle of a running session actor.
#[derive(Debug)]
pub struct SessionHandle {
    endpoint: Endpoint,
    outbox: Outbox,
    state: watch::Receiver<SessionState>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Start a session actor for `endpoint`.
    pub fn spawn(endpoint: Endpoint, config: SessionConfig, router: Arc<ProtocolRouter>) -> Self {
        let (tx, queue) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::Connecting);
        let shutdown = Arc::new(Notify::new());
        let outbox = Outbox::new(tx);

        let actor = SessionActor {
            endpoint: endpoint.clone(),
            config,
            router,
            outbox: outbox.clone(),
            queue,
            state: state_tx,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(actor.run());

        Self {
            endpoint,
            outbox,
            state,
            shutdown,
            task,
        }
    }

    /// Endpoint this session belongs to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Queue an envelope; delivered in submission order once connected.
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        self.outbox.send(envelope)
    }

    /// Reply path into this session
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait until the session reports `target`.
    pub async fn wait_for(&self, target: SessionState) -> Result<()> {
        let mut rx = self.state.clone();
        loop {
            if *rx.borrow_and_update() == target {
                return Ok(());
            }
            rx.changed()
                .await
                .map_err(|_| ReviewError::Transport("session actor exited".into()))?;
        }
    }

    /// Stop the actor. This is the only terminal transition.
    pub async fn close(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            tracing::warn!(endpoint = %self.endpoint, error = %e, "Session task ended abnormally");
        }
    }
}

enum Exit {
    Shutdown,
    Failed(ReviewError),
}

struct SessionActor {
    endpoint: Endpoint,
    config: SessionConfig,
    router: Arc<ProtocolRouter>,
    outbox: Outbox,
    queue: mpsc::UnboundedReceiver<String>,
    state: watch::Sender<SessionState>,
    shutdown: Arc<Notify>,
}

impl SessionActor {
    async fn run(mut self) {
        let shutdown = self.shutdown.clone();

        loop {
            self.set_state(SessionState::Connecting);
            let connected = tokio::select! {
                () = shutdown.notified() => break,
                result = self.connect() => result,
            };

            match connected {
                Ok(ws) => {
                    self.set_state(SessionState::Connected);
                    tracing::info!(endpoint = %self.endpoint, "Connected to WebSocket server");
                    match self.serve(ws).await {
                        Exit::Shutdown => break,
                        Exit::Failed(e) => {
                            tracing::warn!(
                                endpoint = %self.endpoint,
                                error = %e,
                                "Disconnected, trying to reconnect"
                            );
                        },
                    }
                },
                Err(e) => {
                    tracing::warn!(endpoint = %self.endpoint, error = %e, "Failed to connect");
                },
            }

            self.set_state(SessionState::Disconnected);
            self.set_state(SessionState::ReconnectPending);
            tokio::select! {
                () = shutdown.notified() => break,
                () = tokio::time::sleep(self.config.reconnect_delay) => {},
            }
            tracing::info!(endpoint = %self.endpoint, "Attempting reconnection");
        }

        self.set_state(SessionState::Removed);
        tracing::info!(endpoint = %self.endpoint, "Session removed");
    }

    fn set_state(&self, state: SessionState) {
        tracing::debug!(endpoint = %self.endpoint, %state, "Session state");
        self.state.send_replace(state);
    }

    async fn connect(&self) -> Result<WsStream> {
        let url = self.endpoint.ws_url(&self.config.handshake_path);
        let (ws, _response) =
            tokio::time::timeout(self.config.connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| ReviewError::Transport(format!("connect to {url} timed out")))??;
        Ok(ws)
    }

    /// Pump one live connection until it fails or shutdown is requested.
    async fn serve(&mut self, ws: WsStream) -> Exit {
        let (mut sink, mut stream) = ws.split();
        let inbound = Inbound {
            host: self.endpoint.host.clone(),
            origin: self.endpoint.key(),
            reply: self.outbox.clone(),
        };
        let Self {
            router,
            queue,
            shutdown,
            endpoint,
            ..
        } = self;

        loop {
            tokio::select! {
                biased;

                () = shutdown.notified() => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        tracing::debug!(endpoint = %endpoint, error = %e, "Close frame not delivered");
                    }
                    return Exit::Shutdown;
                }

                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(endpoint = %endpoint, %text, "Received frame");
                        router.dispatch_text(inbound.clone(), &text).await;
                    },
                    Some(Ok(Message::Binary(bytes))) => {
                        tracing::warn!(endpoint = %endpoint, len = bytes.len(), "Ignoring binary frame");
                    },
                    Some(Ok(Message::Close(_))) => {
                        return Exit::Failed(ReviewError::Transport("closed by peer".into()));
                    },
                    Some(Ok(_)) => {},
                    Some(Err(e)) => return Exit::Failed(e.into()),
                    None => return Exit::Failed(ReviewError::Transport("stream ended".into())),
                },

                Some(text) = queue.recv() => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::warn!(endpoint = %endpoint, "Dropping message whose write failed");
                        return Exit::Failed(e.into());
                    }
                }
            }
        }
    }
}
