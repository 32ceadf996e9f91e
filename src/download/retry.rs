//! Retry logic with backoff for fetches against a defended origin.
//!
//! This module provides the [`RetryProfile`] presets, the status
//! classification used to decide between retrying, backing off and giving up,
//! and the [`RetryingFetcher`] that wraps a single GET with all of it.
//!
//! # Overview
//!
//! Every attempt's outcome is classified into a [`FailureType`]:
//! - [`FailureType::NotFound`] - HTTP 404; never retried, the caller decides
//! - [`FailureType::Blocked`] - HTTP 403/429/503; exponential backoff, may refresh the session
//! - [`FailureType::Transient`] - other statuses and transport errors; flat short pause
//!
//! Three profiles capture the different cost of each call site:
//!
//! | Profile | Backoff on block | Session refresh |
//! |---------|------------------|-----------------|
//! | `template` | 2s, 4s, 8s | never |
//! | `page` | 10s, 30s, 60s (cap 60s) | after more than 2 consecutive blocks |
//! | `image` | 15s, 45s, 90s (cap 90s) | after more than 3 consecutive blocks |

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::client::{HttpResponse, Session};
use super::error::FetchError;
use super::rate_limiter::RateController;

/// Default maximum attempts per fetch.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Classification of a failed fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// The resource does not exist (HTTP 404).
    NotFound,

    /// Anti-automation or rate limiting (HTTP 403, 429, 503).
    Blocked,

    /// Anything else: unexpected status or no response at all.
    Transient,
}

/// Decision on whether to retry a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the fetch after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry the fetch.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Backoff and session-refresh tuning for one kind of fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryProfile {
    /// Short label used in log events.
    name: &'static str,

    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Wait after the first blocked attempt.
    base_delay: Duration,

    /// Growth factor applied per further blocked attempt.
    multiplier: u32,

    /// Upper bound for a single backoff wait.
    max_delay: Option<Duration>,

    /// Refresh the session once consecutive blocks exceed this count.
    refresh_after: Option<u32>,

    /// Flat pause after a transient failure.
    transient_delay: Duration,
}

impl Default for RetryProfile {
    fn default() -> Self {
        Self::image()
    }
}

impl RetryProfile {
    /// Profile for resolving the sample image (gallery validation).
    #[must_use]
    pub fn template() -> Self {
        Self {
            name: "template",
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(2),
            multiplier: 2,
            max_delay: None,
            refresh_after: None,
            transient_delay: Duration::from_secs(2),
        }
    }

    /// Profile for crawling reader pages one by one.
    #[must_use]
    pub fn page() -> Self {
        Self {
            name: "page",
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(10),
            multiplier: 3,
            max_delay: Some(Duration::from_secs(60)),
            refresh_after: Some(2),
            transient_delay: Duration::from_secs(5),
        }
    }

    /// Profile for downloading page images.
    #[must_use]
    pub fn image() -> Self {
        Self {
            name: "image",
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(15),
            multiplier: 3,
            max_delay: Some(Duration::from_secs(90)),
            refresh_after: Some(3),
            transient_delay: Duration::from_secs(5),
        }
    }

    /// Returns a copy with a different attempt budget (minimum 1).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Returns the profile label.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the consecutive-block threshold that triggers a session refresh.
    #[must_use]
    pub fn refresh_after(&self) -> Option<u32> {
        self.refresh_after
    }

    /// Wait after a blocked response on `attempt` (1-indexed).
    ///
    /// Formula: `min(base_delay * multiplier^(attempt - 1), max_delay)`
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        let delay = self.base_delay.saturating_mul(factor);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(level = "trace", skip(self), fields(profile = self.name))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::NotFound {
            return RetryDecision::DoNotRetry {
                reason: "not found - caller decides on fallback".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = match failure_type {
            FailureType::Blocked => self.backoff_delay(attempt),
            FailureType::Transient | FailureType::NotFound => self.transient_delay,
        };
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }
}

/// Classifies a non-200 HTTP status.
///
/// | Status | Type |
/// |--------|------|
/// | 404 | NotFound |
/// | 403, 429, 503 | Blocked |
/// | anything else | Transient |
#[must_use]
pub fn classify_status(status: u16) -> FailureType {
    match status {
        404 => FailureType::NotFound,
        403 | 429 | 503 => FailureType::Blocked,
        _ => FailureType::Transient,
    }
}

fn failure_type_of(error: &FetchError) -> FailureType {
    match error {
        FetchError::NotFound { .. } => FailureType::NotFound,
        FetchError::Blocked { .. } => FailureType::Blocked,
        FetchError::Unexpected { .. } | FetchError::Transport(_) | FetchError::GaveUp { .. } => {
            FailureType::Transient
        }
    }
}

/// One GET with bounded retries, shared pacing and session refresh.
#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    session: Arc<Session>,
    rate: Arc<RateController>,
    profile: RetryProfile,
}

impl RetryingFetcher {
    /// Creates a fetcher over a shared session and rate controller.
    #[must_use]
    pub fn new(session: Arc<Session>, rate: Arc<RateController>, profile: RetryProfile) -> Self {
        Self {
            session,
            rate,
            profile,
        }
    }

    /// Returns the retry profile in use.
    #[must_use]
    pub fn profile(&self) -> &RetryProfile {
        &self.profile
    }

    /// Returns the shared rate controller.
    #[must_use]
    pub fn rate(&self) -> &Arc<RateController> {
        &self.rate
    }

    /// Fetches `url`, returning the first HTTP 200 response.
    ///
    /// # Errors
    ///
    /// - [`FetchError::NotFound`] immediately on HTTP 404 (no wait, no retry)
    /// - [`FetchError::GaveUp`] once every attempt failed
    #[instrument(skip(self), fields(profile = self.profile.name))]
    pub async fn fetch(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.rate.acquire().await;
            let client = self.session.current().await;

            let error = match client.get(url).await {
                Ok(response) if response.status == 200 => {
                    self.rate.record_success();
                    return Ok(response);
                }
                Ok(response) => match classify_status(response.status) {
                    FailureType::NotFound => {
                        debug!(url, "not found");
                        return Err(FetchError::NotFound {
                            url: url.to_string(),
                        });
                    }
                    FailureType::Blocked => FetchError::Blocked {
                        url: url.to_string(),
                        status: response.status,
                    },
                    FailureType::Transient => FetchError::Unexpected {
                        url: url.to_string(),
                        status: response.status,
                    },
                },
                Err(transport) => FetchError::Transport(transport),
            };

            let failure_type = failure_type_of(&error);
            let failures = if failure_type == FailureType::Blocked {
                self.rate.record_blocked()
            } else {
                0
            };

            match self.profile.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    warn!(
                        url,
                        attempt,
                        next_attempt,
                        delay_secs = delay.as_secs_f64(),
                        error = %error,
                        "fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;

                    if self
                        .profile
                        .refresh_after
                        .is_some_and(|threshold| failures > threshold)
                    {
                        match self.session.refresh().await {
                            Ok(()) => self.rate.reset_failures(),
                            Err(refresh_error) => {
                                warn!(
                                    error = %refresh_error,
                                    "session refresh failed, keeping old session"
                                );
                            }
                        }
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    if failure_type == FailureType::Blocked {
                        // A block always costs one backoff wait before the next request.
                        let delay = self.profile.backoff_delay(attempt);
                        info!(url, delay_secs = delay.as_secs_f64(), "cooling down after block");
                        tokio::time::sleep(delay).await;
                    }
                    warn!(url, attempts = attempt, %reason, error = %error, "giving up");
                    return Err(FetchError::GaveUp {
                        url: url.to_string(),
                        attempts: attempt,
                        last: Box::new(error),
                    });
                }
            }
        }
    }
}
