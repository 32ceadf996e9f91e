//! Gallery run orchestration: inspect, enumerate, download, archive.
//!
//! A [`Grabber`] owns the shared HTTP session and rate controller for one
//! invocation. [`Grabber::inspect`] turns a start URL into a [`GalleryRun`]
//! via the [`PageFetcher`]; [`Grabber::download`] feeds the run's candidate
//! URLs through the [`DownloadPipeline`] and packs whatever was saved.
//!
//! Only origin-level problems (unrecognized start page, unreachable origin,
//! no naming template) are errors here. Page-level failures end up in the
//! [`DownloadSummary`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::archive::{self, ArchiveError};
use crate::download::{
    DEFAULT_CONCURRENCY, DownloadPipeline, DownloadSummary, EngineError, FetchError, NoProgress,
    ProgressSink, RateController, RetryProfile, RetryingFetcher, Session,
};
use crate::site::{GalleryMetadata, PageCrawler, PageFetcher, ValidationError};
use crate::template::{TemplateError, UrlTemplate};

/// Longest title component, in bytes.
const MAX_TITLE_BYTES: usize = 200;

/// Fatal errors for a whole gallery run.
#[derive(Debug, Error)]
pub enum GalleryError {
    /// The start page is not a recognized gallery.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The sample image URL has no page numbering to enumerate.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The origin could not be fetched after all retries.
    #[error("origin fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The download pipeline could not be set up.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The archive could not be written.
    #[error("cannot create archive: {0}")]
    Archive(#[from] ArchiveError),

    /// The gallery directory could not be created.
    #[error("cannot create directory {path}: {source}")]
    Directory {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A blocking worker panicked or was cancelled.
    #[error("background task failed: {0}")]
    Worker(String),
}

impl GalleryError {
    /// Returns true when the start URL simply was not recognized.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// How candidate image URLs are produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DownloadMode {
    /// Walk the reader pages one by one.
    #[default]
    Crawl,
    /// Enumerate URLs from the sample image's naming template.
    Normal,
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crawl => f.write_str("crawl"),
            Self::Normal => f.write_str("normal"),
        }
    }
}

/// Error for an unknown download mode name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown mode {0:?} (expected \"crawl\" or \"normal\")")]
pub struct ParseModeError(String);

impl FromStr for DownloadMode {
    type Err = ParseModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "crawl" => Ok(Self::Crawl),
            "normal" => Ok(Self::Normal),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// Makes a gallery title safe to use as one directory / file name.
///
/// Path separators and characters reserved on common filesystems become `_`,
/// whitespace runs collapse to a single space, leading dots and trailing
/// dots/spaces are dropped, and the result is cut to a bounded length.
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut prev_space = false;
    for ch in title.trim().chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => ' ',
            c if c.is_control() => continue,
            c => c,
        };
        if mapped == ' ' {
            if prev_space {
                continue;
            }
            prev_space = true;
        } else {
            prev_space = false;
        }
        if out.len() + mapped.len_utf8() > MAX_TITLE_BYTES {
            break;
        }
        out.push(mapped);
    }
    let cleaned = out
        .trim_start_matches(['.', ' '])
        .trim_end_matches(['.', ' '])
        .to_string();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

/// One recognized gallery and where it goes on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryRun {
    metadata: GalleryMetadata,
    directory: PathBuf,
    archive_name: String,
    mode: DownloadMode,
    zip_only: bool,
}

impl GalleryRun {
    /// Places the gallery under `{base}/{category}/{subcategory}/{title}/`.
    #[must_use]
    pub fn new(
        metadata: GalleryMetadata,
        base_dir: &Path,
        mode: DownloadMode,
        zip_only: bool,
    ) -> Self {
        let archive_name = sanitize_title(&metadata.title);
        let directory = base_dir
            .join(sanitize_title(&metadata.category))
            .join(sanitize_title(&metadata.subcategory))
            .join(&archive_name);
        Self {
            metadata,
            directory,
            archive_name,
            mode,
            zip_only,
        }
    }

    /// Gallery metadata as inspected.
    #[must_use]
    pub fn metadata(&self) -> &GalleryMetadata {
        &self.metadata
    }

    /// Directory pages and the archive are written to.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Archive file name without extension (the sanitized title).
    #[must_use]
    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    /// Candidate source mode.
    #[must_use]
    pub fn mode(&self) -> DownloadMode {
        self.mode
    }

    /// Whether source pages are deleted after archiving.
    #[must_use]
    pub fn zip_only(&self) -> bool {
        self.zip_only
    }

    /// Normal-mode candidates: normal sequence, then the three special passes.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] if the sample image URL has no digit run.
    pub fn template_candidates(&self) -> Result<Vec<String>, TemplateError> {
        let template = UrlTemplate::parse(&self.metadata.sample_image_url)?;
        debug!(
            pattern = %template.pattern(),
            widths = ?template.digit_widths(),
            "inferred naming template"
        );
        Ok(template.all_candidates(self.metadata.page_count).collect())
    }
}

/// Settings that stay the same across galleries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabberSettings {
    /// Root of the `{category}/{subcategory}/{title}` tree.
    pub base_dir: PathBuf,
    /// Candidate source mode.
    pub mode: DownloadMode,
    /// Delete pages after archiving.
    pub zip_only: bool,
    /// Number of concurrent image workers.
    pub concurrency: usize,
}

impl GrabberSettings {
    /// Settings with the default mode, concurrency and no zip-only.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            mode: DownloadMode::default(),
            zip_only: false,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// What a finished gallery run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryOutcome {
    /// Where the pages were written.
    pub directory: PathBuf,
    /// Per-page results.
    pub summary: DownloadSummary,
    /// Path of the archive, if one was written.
    pub archive: Option<PathBuf>,
}

/// Drives gallery runs over one shared session and rate controller.
pub struct Grabber {
    session: Arc<Session>,
    rate: Arc<RateController>,
    pages: Arc<dyn PageFetcher>,
    settings: GrabberSettings,
    cancel: Arc<AtomicBool>,
    progress: Arc<dyn ProgressSink>,
}

impl fmt::Debug for Grabber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grabber")
            .field("settings", &self.settings)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Grabber {
    /// Creates a grabber. `pages` inspects start URLs; `session` and `rate`
    /// are shared by every fetch the grabber makes.
    #[must_use]
    pub fn new(
        session: Arc<Session>,
        rate: Arc<RateController>,
        pages: Arc<dyn PageFetcher>,
        settings: GrabberSettings,
    ) -> Self {
        Self {
            session,
            rate,
            pages,
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(NoProgress),
        }
    }

    /// Uses `flag` to stop crawling and skip pages not yet started.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Reports download progress to `sink`.
    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Returns the settings in use.
    #[must_use]
    pub fn settings(&self) -> &GrabberSettings {
        &self.settings
    }

    fn fetcher(&self, profile: RetryProfile) -> RetryingFetcher {
        RetryingFetcher::new(Arc::clone(&self.session), Arc::clone(&self.rate), profile)
    }

    /// Inspects `url` and plans the run.
    ///
    /// # Errors
    ///
    /// [`GalleryError::Validation`] for an unrecognized page, other variants
    /// when the origin cannot be reached.
    #[instrument(skip(self))]
    pub async fn inspect(&self, url: &str) -> Result<GalleryRun, GalleryError> {
        let metadata = self.pages.fetch_gallery_metadata(url).await?;
        Ok(GalleryRun::new(
            metadata,
            &self.settings.base_dir,
            self.settings.mode,
            self.settings.zip_only,
        ))
    }

    /// Downloads every page of `run` and archives what was saved.
    ///
    /// # Errors
    ///
    /// Returns [`GalleryError`] for origin-level failures only.
    #[instrument(skip(self, run), fields(title = %run.metadata().title, mode = %run.mode()))]
    pub async fn download(&self, run: &GalleryRun) -> Result<GalleryOutcome, GalleryError> {
        let candidates = self.candidates(run)?;

        let directory = run.directory().to_path_buf();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|source| GalleryError::Directory {
                path: directory.clone(),
                source,
            })?;
        info!(
            directory = %directory.display(),
            pages = run.metadata().page_count,
            "downloading gallery"
        );

        let pipeline =
            DownloadPipeline::new(self.fetcher(RetryProfile::image()), self.settings.concurrency)?
            .with_cancel_flag(Arc::clone(&self.cancel))
            .with_progress(Arc::clone(&self.progress));
        let summary = pipeline.run(candidates, &directory).await?;

        let archive = if summary.saved().is_empty() {
            warn!("no pages saved, skipping archive");
            None
        } else {
            Some(self.archive(run, &summary).await?)
        };

        Ok(GalleryOutcome {
            directory,
            summary,
            archive,
        })
    }

    /// Inspects and downloads `url` in one go.
    ///
    /// # Errors
    ///
    /// See [`inspect`](Self::inspect) and [`download`](Self::download).
    pub async fn grab(&self, url: &str) -> Result<GalleryOutcome, GalleryError> {
        let run = self.inspect(url).await?;
        self.download(&run).await
    }

    fn candidates(&self, run: &GalleryRun) -> Result<BoxStream<'static, String>, GalleryError> {
        match run.mode() {
            DownloadMode::Normal => {
                let urls = run.template_candidates()?;
                Ok(stream::iter(urls).boxed())
            }
            DownloadMode::Crawl => {
                let start = &run.metadata().first_page_url;
                let base = Url::parse(start).map_err(|source| ValidationError::InvalidUrl {
                    url: start.clone(),
                    source,
                })?;
                let crawler = PageCrawler::new(
                    self.fetcher(RetryProfile::page()),
                    base,
                    start.clone(),
                    run.metadata().page_count,
                )
                .with_cancel_flag(Arc::clone(&self.cancel));
                Ok(crawler.into_stream().boxed())
            }
        }
    }

    async fn archive(
        &self,
        run: &GalleryRun,
        summary: &DownloadSummary,
    ) -> Result<PathBuf, GalleryError> {
        if self.cancel.load(Ordering::SeqCst) {
            info!("run was cancelled, archiving the pages saved so far");
        }
        let directory = run.directory().to_path_buf();
        let files = summary.ordered_file_names();
        let name = run.archive_name().to_string();
        let zip_only = run.zip_only();

        tokio::task::spawn_blocking(move || archive::assemble(&directory, &files, &name, zip_only))
            .await
            .map_err(|e| GalleryError::Worker(e.to_string()))?
            .map_err(GalleryError::from)
    }
}
