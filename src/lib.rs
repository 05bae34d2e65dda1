//! # MinReview - Inspection Review Hub and Client
//!
//! Links a fleet of review clients to an inspection hub. The hub broadcasts
//! "report ready" notifications over persistent WebSocket sessions; each
//! client fetches the XML report over resumable HTTP, converts its
//! `<component>` subtree to JSON while it streams in, downloads the images
//! the report references, and answers over the same session.
//!
//! ## Features
//!
//! - **Broadcast hub**: axum server with `/tasks`, `/setting`, `/ws`;
//!   serialized per-session writes and a keepalive ping
//! - **Resilient sessions**: one WebSocket per hub endpoint, reconnecting
//!   forever at a fixed delay; queued messages survive reconnects
//! - **Protocol routing**: `protocol_id` → async handler
//! - **Resumable fetch**: `Range` requests, 200/206/416 handling, chunked
//!   streaming into a file and an optional sink
//! - **Streaming transducer**: incremental XML → JSON with repeated
//!   children folded into arrays and asset discovery
//! - **Download coordinator**: per-URL deduplication on a bounded pool
//!
//! ### Architecture
//!
//! ```text
//! Inspector ── GET /tasks ──> Hub ══ protocol 1 ══> ReviewClient
//!                              ^                        │
//!                              │                        ├─ ResumableFetcher ─> report.xml
//!                              │                        │        └─ XmlToJson ─> report.json
//!                              │                        │                └─ DownloadCoordinator ─> *.png
//!                              └════ protocol 2 ════════┘
//! ```
//!
//! ## Quick Start
//!
//! ### Hub
//!
//! ```rust,ignore
//! use minreview::server::{serve, ServerConfig};
//!
//! serve(ServerConfig::default()).await?;
//! ```
//!
//! ### Client
//!
//! ```rust,ignore
//! use minreview::{Config, ReviewClient};
//!
//! let config = Config::from_env();
//! let client = ReviewClient::new(&config.client, &config.download)?;
//! client.start().await;
//! ```
//!
//! ### Transducer
//!
//! ```rust
//! use minreview::XmlToJson;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut t = XmlToJson::new(dir.path().join("out.json"));
//! t.feed(b"<report><component><b>1</b>").unwrap();
//! t.feed(b"<b>2</b></component></report>").unwrap();
//! let json = t.finish().unwrap();
//! assert_eq!(json["component"]["b"][1], "2");
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Wire envelope and protocol router
//! - [`transport`]: Client sessions and the TCP listener
//! - [`server`]: Broadcast hub (axum)
//! - [`client`]: Review client and report pipeline
//! - [`fetch`]: Resumable fetcher, cache paths, download coordinator
//! - [`transduce`]: XML → JSON transducer
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod client;
pub mod config;
pub mod error;
pub mod fetch;
pub mod protocol;
pub mod server;
pub mod transduce;
pub mod transport;

// Re-exports for convenience
pub use client::{ReportPipeline, ReviewClient};
pub use config::Config;
pub use error::{Result, ReviewError};
pub use fetch::{ChunkSink, DownloadCoordinator, DownloadJob, FetchOutcome, JobStatus, ResumableFetcher};
pub use protocol::{Envelope, InspectionReport, ProtocolRouter};
pub use server::{AppState, Hub, ServerConfig};
pub use transduce::XmlToJson;
pub use transport::{Endpoint, SessionManager, SessionState, TcpTransport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
