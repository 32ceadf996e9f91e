//! Concurrent download pipeline for gallery page images.
//!
//! This module provides the [`DownloadPipeline`] which turns a sequence of
//! candidate image URLs into saved page files, using a semaphore-based
//! concurrency limit, the shared [`RateController`](super::RateController)
//! gate and the image [`RetryProfile`](super::RetryProfile).
//!
//! # Overview
//!
//! 1. The candidate source is collected fully before any worker starts.
//! 2. Each candidate becomes a [`DownloadTask`] run by its own Tokio task;
//!    at most `concurrency` tasks run at once.
//! 3. A worker fetches, retries once with the swapped extension on 404
//!    (`.jpg` ↔ `.png`), decodes and saves the page as `{index}.{ext}`.
//! 4. Outcomes are folded into a [`DownloadSummary`] whose saved list is
//!    ordered by numeric index, whatever order the workers finished in.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use futures_util::stream;
//! use wgrabber::download::{
//!     DownloadPipeline, RateConfig, RateController, ReqwestSessionFactory, RetryProfile,
//!     RetryingFetcher, Session,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Arc::new(Session::new(Arc::new(ReqwestSessionFactory::default()))?);
//! let rate = Arc::new(RateController::new(RateConfig::default()));
//! let fetcher = RetryingFetcher::new(session, rate, RetryProfile::image());
//! let pipeline = DownloadPipeline::new(fetcher, 3)?;
//! let urls = vec!["https://img.example/0001.jpg".to_string()];
//! let summary = pipeline.run(stream::iter(urls), Path::new("/tmp/gallery")).await?;
//! println!("saved {} of {}", summary.saved().len(), summary.attempted());
//! # Ok(())
//! # }
//! ```

mod persistence;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{Stream, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::error::FetchError;
use super::retry::RetryingFetcher;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 16;

/// Default number of concurrent workers.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Failures beyond this count are summarized instead of listed.
const MAX_LISTED_FAILURES: usize = 10;

/// Error type for pipeline setup and coordination.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Receives progress notifications from a pipeline run.
pub trait ProgressSink: Send + Sync {
    /// Called once with the number of candidates before any worker starts.
    fn start(&self, total: usize);

    /// Called once per finished task, whatever its outcome.
    fn advance(&self);

    /// Called once after every task has been folded into the summary.
    fn finish(&self);
}

/// A [`ProgressSink`] that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&self, _total: usize) {}
    fn advance(&self) {}
    fn finish(&self) {}
}

/// Result of a single candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Not processed yet.
    Pending,
    /// Saved under this file name in the destination directory.
    Saved(String),
    /// HTTP 404 under the original and the fallback extension.
    Missing,
    /// Gave up: fetch exhausted, undecodable payload or write failure.
    Failed(String),
}

/// One candidate URL and what became of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Ordering key, unique within one run.
    pub index: usize,
    /// Candidate URL as produced by the source.
    pub url: String,
    /// Outcome, owned by the worker processing the task.
    pub outcome: TaskOutcome,
}

impl DownloadTask {
    fn new(index: usize, url: String) -> Self {
        Self {
            index,
            url,
            outcome: TaskOutcome::Pending,
        }
    }
}

/// Aggregate result of a pipeline run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    saved: Vec<(usize, String)>,
    failed: Vec<(usize, String)>,
    missing: Vec<(usize, String)>,
    cancelled: usize,
}

impl DownloadSummary {
    /// Saved pages as `(index, file name)`, ascending by numeric index.
    #[must_use]
    pub fn saved(&self) -> &[(usize, String)] {
        &self.saved
    }

    /// Failed candidates as `(index, url)`, ascending by index.
    #[must_use]
    pub fn failed(&self) -> &[(usize, String)] {
        &self.failed
    }

    /// Candidates that do not exist (404 under both extensions).
    #[must_use]
    pub fn missing(&self) -> &[(usize, String)] {
        &self.missing
    }

    /// Number of candidates skipped because the run was cancelled.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.cancelled
    }

    /// Number of candidates that were processed (saved + failed + missing).
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.saved.len() + self.failed.len() + self.missing.len()
    }

    /// Returns true when the run had no candidates at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempted() == 0 && self.cancelled == 0
    }

    /// File names to archive, in archive order.
    #[must_use]
    pub fn ordered_file_names(&self) -> Vec<String> {
        self.saved.iter().map(|(_, name)| name.clone()).collect()
    }

    /// Whether failures exceed half of the successes.
    #[must_use]
    pub fn failure_rate_is_high(&self) -> bool {
        self.failed.len() * 2 > self.saved.len()
    }

    /// One-line human-readable summary, listing failed indices when there are few.
    #[must_use]
    pub fn report(&self) -> String {
        let mut line = format!(
            "Download complete: {} attempted, {} saved, {} failed, {} missing",
            self.attempted(),
            self.saved.len(),
            self.failed.len(),
            self.missing.len()
        );
        if self.cancelled > 0 {
            line.push_str(&format!(", {} cancelled", self.cancelled));
        }
        if !self.failed.is_empty() && self.failed.len() <= MAX_LISTED_FAILURES {
            let indices: Vec<String> = self.failed.iter().map(|(i, _)| i.to_string()).collect();
            line.push_str(&format!(" (failed pages: {})", indices.join(", ")));
        }
        line
    }

    /// Emits the summary (and the high-failure warning) as log events.
    pub fn log(&self) {
        info!(
            attempted = self.attempted(),
            saved = self.saved.len(),
            failed = self.failed.len(),
            missing = self.missing.len(),
            cancelled = self.cancelled,
            "{}",
            self.report()
        );
        if !self.failed.is_empty() && self.failure_rate_is_high() {
            warn!(
                failed = self.failed.len(),
                saved = self.saved.len(),
                "more than half as many pages failed as were saved - the origin is likely \
                 blocking; retry later or lower --concurrency"
            );
        }
    }

    fn record(&mut self, task: DownloadTask) {
        match task.outcome {
            TaskOutcome::Saved(name) => self.saved.push((task.index, name)),
            TaskOutcome::Missing => self.missing.push((task.index, task.url)),
            TaskOutcome::Failed(_) | TaskOutcome::Pending => {
                self.failed.push((task.index, task.url));
            }
        }
    }

    fn sort(&mut self) {
        self.saved
            .sort_by_key(|(index, name)| (stem_number(name).is_none(), stem_number(name), *index));
        self.failed.sort_by_key(|(index, _)| *index);
        self.missing.sort_by_key(|(index, _)| *index);
    }
}

/// Parses the numeric stem of `"{index}.{ext}"`.
fn stem_number(file_name: &str) -> Option<u64> {
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);
    stem.parse().ok()
}

/// Splits the final path segment of `url` into `(prefix_with_dot, extension)`.
fn split_extension(url: &str) -> Option<(&str, &str)> {
    let path_end = url.find(['?', '#']).unwrap_or(url.len());
    let path = &url[..path_end];
    let segment_start = path.rfind('/').map_or(0, |i| i + 1);
    let dot = path[segment_start..].rfind('.')? + segment_start;
    let extension = &path[dot + 1..];
    if extension.is_empty() {
        return None;
    }
    Some((&url[..=dot], extension))
}

/// Lowercase extension of the URL's final path segment, `jpg` when absent.
fn extension_of(url: &str) -> String {
    split_extension(url).map_or_else(|| "jpg".to_string(), |(_, ext)| ext.to_ascii_lowercase())
}

/// Swaps `.jpg`/`.jpeg` with `.png` and back. Other extensions have no fallback.
fn swap_extension(url: &str) -> Option<String> {
    let (prefix, extension) = split_extension(url)?;
    let path_end = url.find(['?', '#']).unwrap_or(url.len());
    let replacement = match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "png",
        "png" => "jpg",
        _ => return None,
    };
    Some(format!("{prefix}{replacement}{}", &url[path_end..]))
}

/// Bounded worker pool that downloads, decodes and saves page images.
///
/// # Concurrency Model
///
/// - Each candidate runs in its own Tokio task
/// - A semaphore permit is acquired before starting each task
/// - Permits are released automatically when tasks complete (RAII)
/// - Every fetch passes the shared rate gate, so the request rate is global
///
/// # Cancellation
///
/// The cancellation flag is checked before each task starts. Tasks already
/// running finish (or fail) normally; the remaining ones are counted as
/// cancelled. Files already saved stay on disk.
pub struct DownloadPipeline {
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
    /// Configured concurrency limit.
    concurrency: usize,
    /// Fetcher for image payloads.
    fetcher: RetryingFetcher,
    cancel: Arc<AtomicBool>,
    progress: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for DownloadPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadPipeline")
            .field("concurrency", &self.concurrency)
            .field("profile", self.fetcher.profile())
            .field("cancelled", &self.cancel.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl DownloadPipeline {
    /// Creates a pipeline with `concurrency` workers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-16).
    #[instrument(level = "debug", skip(fetcher))]
    pub fn new(fetcher: RetryingFetcher, concurrency: usize) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_attempts = fetcher.profile().max_attempts(),
            rate_disabled = fetcher.rate().is_disabled(),
            "creating download pipeline"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            fetcher,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(NoProgress),
        })
    }

    /// Uses `flag` as the cancellation signal (e.g. set from a Ctrl-C handler).
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Reports progress to `sink`.
    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Downloads every candidate from `source` into `destination`.
    ///
    /// An empty source returns an empty summary without touching the
    /// filesystem. Individual page failures never fail the run; they are
    /// recorded in the summary.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SemaphoreClosed`] if the semaphore is closed.
    #[instrument(skip(self, source), fields(destination = %destination.display()))]
    pub async fn run<S>(
        &self,
        source: S,
        destination: &Path,
    ) -> Result<DownloadSummary, EngineError>
    where
        S: Stream<Item = String>,
    {
        let candidates: Vec<String> = source.collect().await;
        let mut summary = DownloadSummary::default();
        if candidates.is_empty() {
            info!("no candidate URLs - nothing to download");
            return Ok(summary);
        }

        let total = candidates.len();
        info!(total, concurrency = self.concurrency, "starting downloads");
        self.progress.start(total);

        let mut handles = Vec::with_capacity(total);
        for (index, url) in candidates.into_iter().enumerate() {
            if self.is_cancelled() {
                summary.cancelled = total - index;
                break;
            }

            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;

            // The flag may have been raised while waiting for a worker slot.
            if self.is_cancelled() {
                summary.cancelled = total - index;
                break;
            }

            let fetcher = self.fetcher.clone();
            let destination = destination.to_path_buf();
            let progress = Arc::clone(&self.progress);
            let task_url = url.clone();

            handles.push((
                index,
                url,
                tokio::spawn(async move {
                    let _permit = permit;
                    let task =
                        process_task(&fetcher, DownloadTask::new(index, task_url), &destination)
                            .await;
                    progress.advance();
                    task
                }),
            ));
        }

        if summary.cancelled > 0 {
            warn!(
                skipped = summary.cancelled,
                "cancelled - waiting for running downloads"
            );
        }
        debug!(task_count = handles.len(), "waiting for downloads to complete");

        for (index, url, handle) in handles {
            match handle.await {
                Ok(task) => summary.record(task),
                Err(e) => {
                    warn!(index, error = %e, "download task panicked");
                    summary.failed.push((index, url));
                }
            }
        }

        summary.sort();
        self.progress.finish();
        summary.log();
        Ok(summary)
    }
}

/// Runs one task end to end: fetch, extension fallback, decode, save.
async fn process_task(
    fetcher: &RetryingFetcher,
    mut task: DownloadTask,
    destination: &Path,
) -> DownloadTask {
    task.outcome = match fetch_with_fallback(fetcher, &task.url).await {
        Ok((used_url, body)) => {
            let extension = extension_of(&used_url);
            match persistence::save_image(destination, task.index, &used_url, &extension, body)
                .await
            {
                Ok(file_name) => TaskOutcome::Saved(file_name),
                Err(e) => {
                    warn!(index = task.index, error = %e, "page not saved");
                    TaskOutcome::Failed(e.to_string())
                }
            }
        }
        Err(e) if e.is_not_found() => {
            debug!(index = task.index, url = %task.url, "page does not exist");
            TaskOutcome::Missing
        }
        Err(e) => {
            warn!(index = task.index, url = %task.url, error = %e, "page download failed");
            TaskOutcome::Failed(e.to_string())
        }
    };
    task
}

/// Fetches `url`; on 404 tries the swapped extension exactly once.
async fn fetch_with_fallback(
    fetcher: &RetryingFetcher,
    url: &str,
) -> Result<(String, Vec<u8>), FetchError> {
    match fetcher.fetch(url).await {
        Ok(response) => Ok((url.to_string(), response.body)),
        Err(error) if error.is_not_found() => {
            let Some(alternate) = swap_extension(url) else {
                return Err(error);
            };
            debug!(url, alternate = %alternate, "trying alternate extension");
            let response = fetcher.fetch(&alternate).await?;
            Ok((alternate, response.body))
        }
        Err(error) => Err(error),
    }
}
