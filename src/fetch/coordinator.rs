//! Deduplicating download coordinator.
//!
//! At most one job per URL is queued or running at a time. Jobs run on a
//! pool bounded by a semaphore; a job's URL leaves the active set when the
//! job ends, whatever the outcome, so it can be submitted again.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Notify, Semaphore};

use super::paths::{resume_offset, url_to_cache_path};
use super::{FetchOutcome, ResumableFetcher};
use crate::error::{Result, ReviewError};

/// Lifecycle of a download job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Accepted, waiting for a pool slot
    Queued,
    /// Holding a pool slot
    Running,
    /// File is complete on disk
    Succeeded,
    /// Fetch or file I/O failed
    Failed,
}

/// A single URL-to-file download.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// Source URL
    pub url: String,
    /// Cache location derived from the URL
    pub local_path: PathBuf,
    /// Bytes already on disk when the job started
    pub resume_offset: u64,
    /// Current status
    pub status: JobStatus,
    /// Failure reason, for failed jobs
    pub error: Option<String>,
}

impl DownloadJob {
    fn new(url: String) -> Self {
        Self {
            url,
            local_path: PathBuf::new(),
            resume_offset: 0,
            status: JobStatus::Queued,
            error: None,
        }
    }

    /// Whether the job ended successfully
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

struct Inner {
    fetcher: ResumableFetcher,
    cache_dir: PathBuf,
    active: Mutex<HashSet<String>>,
    /// Accepted jobs whose callback has not returned yet
    outstanding: AtomicUsize,
    idle: Notify,
    permits: Semaphore,
    workers: usize,
}

impl Inner {
    fn release(&self, url: &str) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
    }

    fn settle(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn run(&self, job: &mut DownloadJob) -> Result<()> {
        job.local_path = url_to_cache_path(&self.cache_dir, &job.url)?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ReviewError::Fetch(format!("worker pool closed: {e}")))?;
        job.status = JobStatus::Running;

        if let Some(parent) = job.local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        job.resume_offset = resume_offset(&job.local_path).await;

        match self
            .fetcher
            .fetch(&job.url, job.resume_offset, &job.local_path, None)
            .await?
        {
            FetchOutcome::AlreadyComplete => {
                tracing::debug!(url = %job.url, "Asset already complete");
            },
            FetchOutcome::Completed { received, .. } => {
                tracing::debug!(url = %job.url, received, "Asset downloaded");
            },
        }
        Ok(())
    }
}

/// Removes the URL from the active set when the job task ends, even by panic.
struct ActiveGuard {
    inner: Arc<Inner>,
    url: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.inner.release(&self.url);
    }
}

/// Counts a job as outstanding until its callback has returned.
struct SettleGuard(Arc<Inner>);

impl Drop for SettleGuard {
    fn drop(&mut self) {
        self.0.settle();
    }
}

/// Shared handle to the download pool.
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("cache_dir", &self.inner.cache_dir)
            .field("workers", &self.inner.workers)
            .field("active", &self.active_count())
            .finish()
    }
}

impl DownloadCoordinator {
    /// Create a coordinator writing under `cache_dir` with `workers` slots
    pub fn new(fetcher: ResumableFetcher, cache_dir: impl Into<PathBuf>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            inner: Arc::new(Inner {
                fetcher,
                cache_dir: cache_dir.into(),
                active: Mutex::new(HashSet::new()),
                outstanding: AtomicUsize::new(0),
                idle: Notify::new(),
                permits: Semaphore::new(workers),
                workers,
            }),
        }
    }

    /// Root of the cache
    pub fn cache_dir(&self) -> &Path {
        &self.inner.cache_dir
    }

    /// Pool size
    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// The fetcher jobs run with
    pub fn fetcher(&self) -> &ResumableFetcher {
        &self.inner.fetcher
    }

    /// Number of queued or running jobs
    pub fn active_count(&self) -> usize {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether a job for `url` is queued or running
    pub fn is_active(&self, url: &str) -> bool {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(url)
    }

    /// Queue a download of `url`.
    ///
    /// Returns `false` without calling `on_complete` when a job for the same
    /// URL is already queued or running. Must be called within a Tokio
    /// runtime.
    pub fn submit<F>(&self, url: impl Into<String>, on_complete: F) -> bool
    where
        F: FnOnce(&DownloadJob) + Send + 'static,
    {
        let url = url.into();
        {
            let mut active = self.inner.active.lock().unwrap_or_else(PoisonError::into_inner);
            if !active.insert(url.clone()) {
                tracing::debug!(%url, "Download already in progress");
                return false;
            }
        }
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);

        let settle = SettleGuard(self.inner.clone());
        let guard = ActiveGuard {
            inner: self.inner.clone(),
            url: url.clone(),
        };
        tokio::spawn(async move {
            let mut job = DownloadJob::new(url);
            match guard.inner.run(&mut job).await {
                Ok(()) => job.status = JobStatus::Succeeded,
                Err(e) => {
                    tracing::warn!(url = %job.url, error = %e, "Download failed");
                    job.status = JobStatus::Failed;
                    job.error = Some(e.to_string());
                },
            }
            // Released first so the callback may resubmit the URL.
            drop(guard);
            on_complete(&job);
            drop(settle);
        });
        true
    }

    /// Wait until no job is queued or running and every completion
    /// callback has returned, including jobs those callbacks submitted.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}
