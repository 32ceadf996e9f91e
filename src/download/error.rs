//! Error types for the download module.
//!
//! Transport failures come from the HTTP collaborator, fetch failures from the
//! retry layer, and save failures from decoding and persisting a payload.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by an [`HttpGet`](super::HttpGet) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Connection-level failure reported without a `reqwest` error.
    #[error("connection failed for {url}: {message}")]
    Connection {
        /// The URL that failed.
        url: String,
        /// Description of the failure.
        message: String,
    },

    /// A fresh HTTP session could not be built.
    #[error("failed to build HTTP session: {source}")]
    Session {
        /// The builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl TransportError {
    /// Creates a network error from a reqwest error, folding timeouts into [`Self::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates a connection error with a plain message.
    pub fn connection(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Outcome of fetching one URL through the retry layer.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP 404. Never retried; callers may try an alternate extension.
    #[error("not found: {url}")]
    NotFound {
        /// The URL that returned 404.
        url: String,
    },

    /// HTTP 403/429/503, the usual anti-automation responses.
    #[error("blocked (HTTP {status}) fetching {url}")]
    Blocked {
        /// The URL that was blocked.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Any other non-200 status.
    #[error("unexpected HTTP {status} fetching {url}")]
    Unexpected {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The request never produced a response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Every attempt failed.
    #[error("gave up on {url} after {attempts} attempts: {last}")]
    GaveUp {
        /// The URL that was abandoned.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// The failure seen on the final attempt.
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Returns true for [`FetchError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors raised while turning a fetched payload into a saved page.
#[derive(Debug, Error)]
pub enum SaveError {
    /// The payload is not a decodable image.
    #[error("cannot decode image {index} from {url}: {source}")]
    Decode {
        /// Page index of the payload.
        index: usize,
        /// URL the payload came from.
        url: String,
        /// The decoder error.
        #[source]
        source: image::ImageError,
    },

    /// File system error while writing the page.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The blocking decode task was cancelled or panicked.
    #[error("image worker for {index} did not complete: {message}")]
    Worker {
        /// Page index of the payload.
        index: usize,
        /// Join error description.
        message: String,
    },
}

impl SaveError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
