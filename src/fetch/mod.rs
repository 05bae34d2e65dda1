//! Resumable streaming HTTP fetch.
//!
//! A fetch appends to a partial local file when one exists, sending
//! `Range: bytes=<len>-`. Body bytes are written to disk and handed to an
//! optional [`ChunkSink`] in bounded chunks as they arrive; the whole body
//! is never buffered.
//!
//! | request | status | result                          |
//! |---------|--------|---------------------------------|
//! | fresh   | 200    | stream body                     |
//! | resume  | 206    | append body                     |
//! | resume  | 416    | [`FetchOutcome::AlreadyComplete`] |
//! | any     | other  | [`ReviewError::UnexpectedStatus`] |

pub mod coordinator;
pub mod paths;

use std::path::Path;

use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::config::DownloadConfig;
use crate::error::{Result, ReviewError};

pub use coordinator::{DownloadCoordinator, DownloadJob, JobStatus};

/// Downstream consumer of body bytes, called once per chunk in order.
pub trait ChunkSink: Send {
    /// Consume one chunk; an error aborts the fetch once the bytes
    /// received so far are flushed.
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<()>;
}

impl ChunkSink for Vec<u8> {
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}

/// How a fetch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Body streamed to the end; `received` counts only this request's bytes.
    Completed {
        /// Bytes written by this request
        received: u64,
        /// Offset the request started at
        resumed_from: u64,
    },
    /// Server answered 416 to a resume: the local copy is already whole.
    AlreadyComplete,
}

impl FetchOutcome {
    /// Whether the local file was extended from an existing prefix
    pub fn resumed(&self) -> bool {
        match self {
            Self::Completed { resumed_from, .. } => *resumed_from > 0,
            Self::AlreadyComplete => true,
        }
    }
}

/// Bytes on disk so far, against the expected total when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    /// Local file length, including any resumed prefix
    pub received: u64,
    /// Expected final length (`resume offset + Content-Length`)
    pub total: Option<u64>,
}

impl FetchProgress {
    /// Completion percentage, when the total is known
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some(self.received as f64 / total as f64 * 100.0),
            None => None,
        }
    }
}

/// HTTP fetcher with resume support.
#[derive(Debug, Clone)]
pub struct ResumableFetcher {
    client: Client,
    chunk_size: usize,
}

impl ResumableFetcher {
    /// Build a fetcher with connect/read timeouts from `config`
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .read_timeout(config.timeout())
            .build()
            .map_err(|e| ReviewError::Fetch(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            chunk_size: config.chunk_size.max(1),
        })
    }

    /// Chunk size handed to sinks
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Fetch `url` into `path`, resuming from whatever is already there.
    pub async fn download(&self, url: &str, path: &Path, sink: Option<&mut dyn ChunkSink>) -> Result<FetchOutcome> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let offset = paths::resume_offset(path).await;
        if offset > 0 {
            tracing::info!(%url, offset, "Detected partial file, resuming download");
        }
        self.fetch(url, offset, path, sink).await
    }

    /// Fetch `url` starting at `offset`, writing to `path`.
    ///
    /// With `offset == 0` the file is truncated; otherwise it is appended to.
    pub async fn fetch(
        &self,
        url: &str,
        offset: u64,
        path: &Path,
        sink: Option<&mut dyn ChunkSink>,
    ) -> Result<FetchOutcome> {
        let resume = offset > 0;
        let mut request = self.client.get(url);
        if resume {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = request.send().await?;
        let status = response.status();
        match (resume, status) {
            (true, StatusCode::RANGE_NOT_SATISFIABLE) => {
                tracing::info!(%url, "File already downloaded completely");
                return Ok(FetchOutcome::AlreadyComplete);
            },
            (true, StatusCode::PARTIAL_CONTENT) | (false, StatusCode::OK) => {},
            (resume, status) => {
                return Err(ReviewError::UnexpectedStatus {
                    status: status.as_u16(),
                    resume,
                })
            },
        }

        let mut progress = FetchProgress {
            received: offset,
            total: response.content_length().map(|len| len + offset),
        };

        let mut file = if resume {
            OpenOptions::new().create(true).append(true).open(path).await?
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
                .await?
        };

        let streamed = self
            .stream_body(url, response, &mut file, sink, &mut progress)
            .await;
        // Whatever was received stays on disk, even when streaming failed.
        let flushed = file.flush().await;
        streamed?;
        flushed?;

        let received = progress.received - offset;
        tracing::info!(%url, path = %path.display(), received, "Download finished");
        Ok(FetchOutcome::Completed {
            received,
            resumed_from: offset,
        })
    }

    async fn stream_body(
        &self,
        url: &str,
        response: reqwest::Response,
        file: &mut File,
        mut sink: Option<&mut dyn ChunkSink>,
        progress: &mut FetchProgress,
    ) -> Result<()> {
        let mut body = response.bytes_stream();
        while let Some(bytes) = body.next().await {
            let bytes = bytes?;
            for chunk in bytes.chunks(self.chunk_size) {
                file.write_all(chunk).await?;
                if let Some(sink) = sink.as_deref_mut() {
                    sink.on_chunk(chunk)?;
                }
                progress.received += chunk.len() as u64;
            }
            if let Some(percent) = progress.percent() {
                tracing::debug!(%url, received = progress.received, percent = format!("{percent:.1}"), "Download progress");
            }
        }
        Ok(())
    }
}
