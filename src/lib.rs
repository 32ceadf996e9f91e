//! wgrabber core library
//!
//! Downloads the page images of one online gallery and packs them into a
//! `.cbz` archive.
//!
//! # Architecture
//!
//! - [`template`] - infers the page naming template from one image URL
//! - [`download`] - HTTP session, adaptive pacing, retries and the concurrent
//!   download pipeline
//! - [`site`] - gallery index parsing and reader page crawling
//! - [`archive`] - ordered ZIP assembly
//! - [`gallery`] - orchestration of one gallery run

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod download;
pub mod gallery;
pub mod site;
pub mod template;
mod user_agent;

// Re-export commonly used types
pub use archive::{ARCHIVE_EXTENSION, ArchiveError, archive_path, assemble};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DownloadPipeline, DownloadSummary, FetchError,
    HttpGet, HttpResponse, NoProgress, ProgressSink, RateConfig, RateController, RetryProfile,
    RetryingFetcher, ReqwestSessionFactory, Session, SessionFactory, TransportError,
};
pub use gallery::{
    DownloadMode, GalleryError, GalleryOutcome, GalleryRun, Grabber, GrabberSettings,
    sanitize_title,
};
pub use site::{GalleryMetadata, PageFetcher, SitePageFetcher, Taxonomy, ValidationError};
pub use template::{TemplateError, UrlTemplate};
