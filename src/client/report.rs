//! Report pipeline: fetch an announced XML report, transduce it to JSON and
//! queue the images it references.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::AsyncReadExt;

use crate::error::Result;
use crate::fetch::paths::{join_url, json_output_path, parent_url, relative_url, resume_offset, url_to_cache_path};
use crate::fetch::{ChunkSink, DownloadCoordinator, FetchOutcome};
use crate::protocol::InspectionReport;
use crate::transduce::{Transduction, XmlToJson};

/// Result of processing one report
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    /// Report URL
    pub url: String,
    /// Downloaded XML
    pub local_path: PathBuf,
    /// Captured JSON
    pub json_path: PathBuf,
    /// How the fetch ended
    pub fetch: FetchOutcome,
    /// Asset URLs handed to the coordinator, in document order
    pub assets: Vec<String>,
}

/// Turns inspection-ready notifications into local report artifacts.
#[derive(Debug, Clone)]
pub struct ReportPipeline {
    coordinator: DownloadCoordinator,
    report_port: u16,
    project_prefix: String,
}

impl ReportPipeline {
    /// Create a pipeline fetching reports on `report_port`
    pub fn new(coordinator: DownloadCoordinator, report_port: u16, project_prefix: impl Into<String>) -> Self {
        Self {
            coordinator,
            report_port,
            project_prefix: project_prefix.into(),
        }
    }

    /// Coordinator used for asset downloads
    pub fn coordinator(&self) -> &DownloadCoordinator {
        &self.coordinator
    }

    /// `host[:port]` reports are fetched from
    pub fn authority(&self, host: &str) -> String {
        if self.report_port == 80 {
            host.to_string()
        } else {
            format!("{host}:{}", self.report_port)
        }
    }

    /// URL of the report at `target` on `host`
    pub fn report_url(&self, host: &str, target: &str) -> Result<String> {
        join_url(&self.authority(host), target)
    }

    /// Fetch and transduce the report described by `report`.
    ///
    /// `fallback_host` is used when the report carries no host tag.
    pub async fn process(&self, report: &InspectionReport, fallback_host: &str) -> Result<ReportOutcome> {
        let host = if report.host.is_empty() {
            fallback_host
        } else {
            report.host.as_str()
        };
        let url = self.report_url(host, &report.target)?;
        let local_path = url_to_cache_path(self.coordinator.cache_dir(), &url)?;
        let json_path = json_output_path(&local_path);
        tracing::info!(%url, path = %local_path.display(), "Fetching report");

        let assets = Arc::new(Mutex::new(Vec::new()));
        let resolver = AssetResolver {
            prefix: self.project_prefix.clone(),
            authority: self.authority(host),
            base: parent_url(&url)?,
        };
        let coordinator = self.coordinator.clone();
        let found = assets.clone();
        let transducer = XmlToJson::new(&json_path).with_asset_callback(move |fragment| {
            let asset = match resolver.resolve(fragment) {
                Ok(asset) => asset,
                Err(e) => {
                    tracing::warn!(%fragment, error = %e, "Skipping unresolvable asset");
                    return;
                },
            };
            tracing::info!(url = %asset, "Queueing asset download");
            coordinator.submit(asset.clone(), |job| {
                tracing::info!(
                    url = %job.url,
                    path = %job.local_path.display(),
                    succeeded = job.succeeded(),
                    "Asset download finished"
                );
            });
            found.lock().unwrap_or_else(PoisonError::into_inner).push(asset);
        });

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let fetcher = self.coordinator.fetcher();
        let offset = resume_offset(&local_path).await;
        let mut transduction = Transduction::new(transducer);
        let fetch = if offset == 0 {
            fetcher
                .fetch(&url, 0, &local_path, Some(&mut transduction as &mut dyn ChunkSink))
                .await?
        } else {
            tracing::info!(%url, offset, "Resuming partial report");
            let fetch = fetcher.fetch(&url, offset, &local_path, None).await?;
            replay(&local_path, &mut transduction, fetcher.chunk_size()).await?;
            fetch
        };

        transduction.finish()?;
        let assets = std::mem::take(&mut *assets.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(ReportOutcome {
            url,
            local_path,
            json_path,
            fetch,
            assets,
        })
    }
}

/// Maps asset fragments found in a report to absolute URLs.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    /// Relative prefix of the shared project tree
    pub prefix: String,
    /// `host[:port]` of the report server
    pub authority: String,
    /// Directory URL of the report, ending in `/`
    pub base: String,
}

impl AssetResolver {
    /// Absolute URL for `fragment`
    pub fn resolve(&self, fragment: &str) -> Result<String> {
        match fragment.find(self.prefix.as_str()).filter(|_| !self.prefix.is_empty()) {
            Some(i) => join_url(
                &self.authority,
                &format!("program/projects/{}", &fragment[i + self.prefix.len()..]),
            ),
            None => relative_url(&self.base, fragment),
        }
    }
}

/// Push a complete local file through the transducer.
async fn replay(path: &Path, sink: &mut dyn ChunkSink, chunk_size: usize) -> Result<()> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        sink.on_chunk(&buf[..n])?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownloadConfig;
    use crate::fetch::ResumableFetcher;

    fn resolver() -> AssetResolver {
        AssetResolver {
            prefix: "../../../../../program/projects/".into(),
            authority: "10.0.0.5".into(),
            base: "http://10.0.0.5/results/42/".into(),
        }
    }

    #[test]
    fn test_resolve_relative_asset() {
        assert_eq!(resolver().resolve("img/a.png").unwrap(), "http://10.0.0.5/results/42/img/a.png");
        assert_eq!(resolver().resolve("/img/a.png").unwrap(), "http://10.0.0.5/results/42/img/a.png");
    }

    #[test]
    fn test_resolve_against_report_with_query() {
        let resolver = AssetResolver {
            base: parent_url("http://10.0.0.5/results/42/report.xml?from=a/b").unwrap(),
            ..resolver()
        };
        assert_eq!(resolver.resolve("img/a.png").unwrap(), "http://10.0.0.5/results/42/img/a.png");
    }

    #[test]
    fn test_resolve_project_asset() {
        assert_eq!(
            resolver().resolve("../../../../../program/projects/p1/lib/u1.jpg").unwrap(),
            "http://10.0.0.5/program/projects/p1/lib/u1.jpg"
        );
    }

    #[test]
    fn test_report_url_port() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = ResumableFetcher::new(&DownloadConfig::default()).unwrap();
        let coordinator = DownloadCoordinator::new(fetcher, dir.path(), 1);

        let default_port = ReportPipeline::new(coordinator.clone(), 80, "x/");
        assert_eq!(
            default_port.report_url("10.0.0.5", "/r/report.xml").unwrap(),
            "http://10.0.0.5/r/report.xml"
        );

        let custom = ReportPipeline::new(coordinator, 8080, "x/");
        assert_eq!(
            custom.report_url("10.0.0.5", "r/report.xml").unwrap(),
            "http://10.0.0.5:8080/r/report.xml"
        );
    }

    #[tokio::test]
    async fn test_replay_feeds_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.xml");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut sink = Vec::new();
        replay(&path, &mut sink, 3).await.unwrap();
        assert_eq!(sink, b"0123456789");
    }
}
