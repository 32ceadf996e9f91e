//! Fetching and saving gallery page images.
//!
//! This module provides the HTTP session abstraction, the adaptive request
//! pacing shared by every worker, the retry layer that classifies responses,
//! and the concurrent pipeline that turns candidate URLs into saved pages.
//!
//! # Features
//!
//! - Replaceable HTTP session with browser identity rotation
//! - Globally spaced request starts with adaptive delay
//! - Per-call-site retry profiles (template, page, image)
//! - Bounded worker pool with `.jpg` ↔ `.png` fallback and image validation
//! - Deterministic page ordering for archiving
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wgrabber::download::{
//!     RateConfig, RateController, ReqwestSessionFactory, RetryProfile, RetryingFetcher, Session,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Arc::new(Session::new(Arc::new(ReqwestSessionFactory::default()))?);
//! let rate = Arc::new(RateController::new(RateConfig::default()));
//! let fetcher = RetryingFetcher::new(session, rate, RetryProfile::page());
//! let page = fetcher.fetch("https://example.com/photos-view-id-1.html").await?;
//! println!("{} bytes", page.body.len());
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod engine;
mod error;
pub mod rate_limiter;
mod retry;

pub use client::{
    HttpGet, HttpResponse, ReqwestClient, ReqwestSessionFactory, Session, SessionFactory,
};
pub use engine::{
    DEFAULT_CONCURRENCY, DownloadPipeline, DownloadSummary, DownloadTask, EngineError, NoProgress,
    ProgressSink, TaskOutcome,
};
pub use error::{FetchError, SaveError, TransportError};
pub use rate_limiter::{RateConfig, RateController, RateSnapshot};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryProfile, RetryingFetcher, classify_status,
};
