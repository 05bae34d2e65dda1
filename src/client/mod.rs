//! Review client: keeps sessions to the configured hubs and reacts to
//! their notifications.
//!
//! | protocol | payload        | action                                    |
//! |----------|----------------|-------------------------------------------|
//! | 1        | report object  | run the report pipeline, reply protocol 2 |
//! | 1        | string         | log                                       |
//! | 2        | any            | log                                       |

mod report;

use std::sync::Arc;

use serde_json::Value;

pub use report::{AssetResolver, ReportOutcome, ReportPipeline};

use crate::config::{ClientConfig, DownloadConfig};
use crate::error::{Result, ReviewError};
use crate::fetch::{DownloadCoordinator, ResumableFetcher};
use crate::protocol::{Envelope, Inbound, InspectionReport, ProtocolRouter, INSPECTION_READY, REVIEW_RESULT};
use crate::transport::{Endpoint, SessionConfig, SessionManager};

/// Handlers a review client runs for frames from its hubs
pub fn client_protocols(pipeline: Arc<ReportPipeline>) -> ProtocolRouter {
    let mut router = ProtocolRouter::new();

    router.register(INSPECTION_READY, move |inbound: Inbound, data: Value| {
        let pipeline = pipeline.clone();
        async move { on_inspection_ready(&pipeline, inbound, data).await }
    });

    router.register(REVIEW_RESULT, |inbound: Inbound, data: Value| async move {
        match data.get("msg").and_then(Value::as_str) {
            Some(msg) => tracing::info!(host = %inbound.host, %msg, "Review message"),
            None => tracing::info!(host = %inbound.host, result = %data, "Review result"),
        }
        Ok(())
    });

    router
}

async fn on_inspection_ready(pipeline: &ReportPipeline, inbound: Inbound, data: Value) -> Result<()> {
    match data {
        Value::String(msg) => {
            tracing::info!(host = %inbound.host, %msg, "Simple message");
            Ok(())
        },
        Value::Object(_) => {
            let mut report: InspectionReport = serde_json::from_value(data)?;
            if report.host.is_empty() {
                report.host = inbound.host.clone();
            }

            let outcome = pipeline.process(&report, &inbound.host).await?;
            tracing::info!(
                url = %outcome.url,
                json = %outcome.json_path.display(),
                assets = outcome.assets.len(),
                "Report processed"
            );
            inbound.reply.send(&Envelope::review_result(&report))
        },
        other => Err(ReviewError::Protocol(format!(
            "unsupported inspection payload: {other}"
        ))),
    }
}

/// A running review client.
#[derive(Debug)]
pub struct ReviewClient {
    endpoints: Vec<Endpoint>,
    pipeline: Arc<ReportPipeline>,
    sessions: SessionManager,
}

impl ReviewClient {
    /// Build a client from configuration; no connection is made yet.
    pub fn new(client: &ClientConfig, download: &DownloadConfig) -> Result<Self> {
        let fetcher = ResumableFetcher::new(download)?;
        let coordinator = DownloadCoordinator::new(fetcher, &client.cache_dir, download.worker_count());
        let pipeline = ReportPipeline::new(coordinator, client.report_port, client.project_prefix.clone());
        let session_config = SessionConfig::default()
            .with_reconnect_delay(client.reconnect_delay())
            .with_handshake_path(&client.handshake_path);

        Ok(Self::with_pipeline(pipeline, session_config, client.endpoints.clone()))
    }

    /// Build a client around an existing pipeline
    pub fn with_pipeline(pipeline: ReportPipeline, session_config: SessionConfig, endpoints: Vec<Endpoint>) -> Self {
        let pipeline = Arc::new(pipeline);
        let router = Arc::new(client_protocols(pipeline.clone()));
        Self {
            endpoints,
            pipeline,
            sessions: SessionManager::new(router, session_config),
        }
    }

    /// Open a session to every configured endpoint.
    pub async fn start(&self) {
        for endpoint in &self.endpoints {
            tracing::info!(%endpoint, "Connecting to hub");
            self.sessions.add_connection(endpoint.clone()).await;
        }
    }

    /// Session registry
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Report pipeline
    pub fn pipeline(&self) -> &ReportPipeline {
        &self.pipeline
    }

    /// Close every session
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }
}
