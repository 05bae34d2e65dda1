//! HTTP request handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Json, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use super::state::AppState;
use crate::protocol::{Envelope, InspectionReport};

/// Body returned by `/tasks` once the notification is queued
pub const TASKS_ACK: &str = "Request /tasks processed and info broadcasted to websocket clients.";

/// Create the hub router
pub fn create_router(state: Arc<AppState>) -> Router {
    let logging = state.config.logging;
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/tasks", get(tasks))
        .route("/setting", get(setting))
        .route("/ws", get(ws_upgrade))
        .with_state(state);

    if logging {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Seconds since the hub started
    pub uptime_secs: u64,
    /// Live WebSocket sessions
    pub sessions: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime().as_secs(),
        sessions: state.hub.len().await,
    })
}

/// Query of an inspector's "report ready" request
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TasksQuery {
    /// Report path on the inspector, including the result prefix
    pub address: String,
    /// Inspected board model
    pub model: String,
    /// Program version
    pub version: String,
}

fn plain_text(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

/// Inspector notification: broadcast the report location to all clients.
async fn tasks(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<TasksQuery>,
) -> Response {
    let target = query
        .address
        .strip_prefix(state.config.result_prefix.as_str())
        .unwrap_or(&query.address)
        .to_string();

    let report = InspectionReport {
        host: peer.ip().to_string(),
        target,
        model: query.model,
        version: query.version,
    };
    tracing::info!(
        host = %report.host,
        target = %report.target,
        model = %report.model,
        version = %report.version,
        "Received inspection notification"
    );

    match state.hub.broadcast(&Envelope::inspection_ready(&report)).await {
        Ok(queued) => {
            tracing::info!(sessions = queued, "Inspection notification broadcast");
            plain_text(StatusCode::OK, TASKS_ACK.to_string())
        },
        Err(e) => plain_text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Acknowledge a setting request, echoing the Host header.
async fn setting(headers: HeaderMap) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    plain_text(
        StatusCode::OK,
        format!("Request /setting has been processed: {host}"),
    )
}

/// Upgrade to a hub session
async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let hub = state.hub.clone();
    let router = state.router.clone();
    ws.on_upgrade(move |socket| hub.run_session(socket, peer, router))
}
