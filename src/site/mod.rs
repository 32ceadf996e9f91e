//! Gallery site collaborator: metadata inspection and page crawling.
//!
//! The download core only needs a [`GalleryMetadata`] and a stream of image
//! URLs. [`SitePageFetcher`] produces the metadata from the gallery index page
//! and [`PageCrawler`] walks the reader pages one by one.

mod crawl;
pub mod parser;
pub mod taxonomy;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

pub use crawl::{MAX_CONSECUTIVE_PAGE_FAILURES, PageCrawler};
pub use taxonomy::{Taxonomy, UNKNOWN_CODE};

use crate::download::{FetchError, RetryingFetcher};
use crate::gallery::GalleryError;

/// The start page is not a gallery index this tool understands.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The start URL could not be parsed, or a link on the page is malformed.
    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        /// The offending URL or link.
        url: String,
        /// The parser error.
        #[source]
        source: url::ParseError,
    },

    /// The start page answered with a status other than 200.
    #[error("the url is not valid (HTTP {status})")]
    Status {
        /// HTTP status code of the start page.
        status: u16,
    },

    /// No non-empty `<h2>` title.
    #[error("cannot find the gallery title")]
    MissingTitle,

    /// No `div.pic_box` thumbnails.
    #[error("cannot find any pic_box elements")]
    MissingPicBox,

    /// A thumbnail has no link to its reader page.
    #[error("cannot find link in pic_box")]
    MissingPageLink,

    /// No label with the page count.
    #[error("cannot find page number")]
    MissingPageCount,

    /// No breadcrumb links.
    #[error("cannot find breadcrumb div")]
    MissingBreadcrumb,

    /// The breadcrumb has no category link.
    #[error("cannot determine category from breadcrumb tags")]
    MissingCategory,

    /// The sample reader page has no `img#picarea`.
    #[error("cannot find data url on {url}")]
    MissingSampleImage {
        /// The reader page that was inspected.
        url: String,
    },
}

/// What the download core needs to know about one gallery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryMetadata {
    /// Gallery title as shown on the site.
    pub title: String,
    /// Category directory code.
    pub category: String,
    /// Language directory code.
    pub subcategory: String,
    /// Declared number of pages.
    pub page_count: usize,
    /// Absolute URL of one page image, used to infer the naming template.
    pub sample_image_url: String,
    /// Absolute URL of the first reader page, where crawling starts.
    pub first_page_url: String,
}

/// HTTP status of a start page that answered, but not with 200.
///
/// `None` when no response was received at all.
fn start_page_status(error: &FetchError) -> Option<u16> {
    match error {
        FetchError::NotFound { .. } => Some(404),
        FetchError::Blocked { status, .. } | FetchError::Unexpected { status, .. } => Some(*status),
        FetchError::GaveUp { last, .. } => start_page_status(last),
        FetchError::Transport(_) => None,
    }
}

/// Produces gallery metadata from a start URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Inspects the gallery at `url`.
    ///
    /// # Errors
    ///
    /// [`GalleryError::Validation`] when the page is not recognized, other
    /// variants when the origin cannot be reached at all.
    async fn fetch_gallery_metadata(&self, url: &str) -> Result<GalleryMetadata, GalleryError>;
}

/// [`PageFetcher`] for the gallery site markup.
#[derive(Debug, Clone)]
pub struct SitePageFetcher {
    fetcher: RetryingFetcher,
    taxonomy: Taxonomy,
}

impl SitePageFetcher {
    /// Creates a fetcher; `fetcher` should use the template retry profile.
    #[must_use]
    pub fn new(fetcher: RetryingFetcher, taxonomy: Taxonomy) -> Self {
        Self { fetcher, taxonomy }
    }
}

#[async_trait]
impl PageFetcher for SitePageFetcher {
    #[instrument(skip(self))]
    async fn fetch_gallery_metadata(&self, url: &str) -> Result<GalleryMetadata, GalleryError> {
        let base = Url::parse(url).map_err(|source| ValidationError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        let index_html = match self.fetcher.fetch(url).await {
            Ok(response) => response.text(),
            Err(error) => {
                return Err(match start_page_status(&error) {
                    Some(status) => ValidationError::Status { status }.into(),
                    None => error.into(),
                });
            }
        };
        let index = parser::parse_index_page(&index_html, &base, &self.taxonomy)?;
        debug!(
            title = %index.title,
            pages = index.page_count,
            category = %index.category,
            subcategory = %index.subcategory,
            "parsed gallery index"
        );

        let sample_html = self.fetcher.fetch(&index.sample_page_url).await?.text();
        let sample_src = parser::parse_sample_image(&sample_html).ok_or_else(|| {
            ValidationError::MissingSampleImage {
                url: index.sample_page_url.clone(),
            }
        })?;
        let sample_image_url = parser::absolutize(&base, &sample_src)?;
        info!(title = %index.title, sample = %sample_image_url, "gallery recognized");

        Ok(GalleryMetadata {
            title: index.title,
            category: index.category,
            subcategory: index.subcategory,
            page_count: index.page_count,
            sample_image_url,
            first_page_url: index.first_page_url,
        })
    }
}
