//! Page-by-page crawl of the reader pages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::Stream;
use futures_util::stream;
use tracing::{debug, info, warn};
use url::Url;

use super::parser;
use crate::download::RetryingFetcher;

/// Unrecoverable pages in a row that end the crawl.
pub const MAX_CONSECUTIVE_PAGE_FAILURES: u32 = 3;

/// Walks reader pages from the first one, yielding each page's image URL.
///
/// Finite: at most `page_count` reader pages are fetched, one network
/// round-trip each. A page that cannot be fetched or parsed is skipped and
/// the same URL is tried for the next page slot; after
/// [`MAX_CONSECUTIVE_PAGE_FAILURES`] such pages in a row the crawl stops.
/// A page without a next link is the last one.
#[derive(Debug, Clone)]
pub struct PageCrawler {
    fetcher: RetryingFetcher,
    base: Url,
    start_url: String,
    page_count: usize,
    cancel: Arc<AtomicBool>,
}

struct CrawlState {
    crawler: PageCrawler,
    next_url: Option<String>,
    page: usize,
    failures_in_a_row: u32,
}

impl PageCrawler {
    /// Creates a crawler; `fetcher` should use the page retry profile.
    #[must_use]
    pub fn new(fetcher: RetryingFetcher, base: Url, start_url: String, page_count: usize) -> Self {
        Self {
            fetcher,
            base,
            start_url,
            page_count,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops the crawl at the next page boundary once `flag` is set.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Consumes the crawler into a stream of absolute image URLs.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send {
        let state = CrawlState {
            next_url: Some(self.start_url.clone()),
            crawler: self,
            page: 0,
            failures_in_a_row: 0,
        };
        stream::unfold(state, |mut state| async move {
            let image = state.next_image().await?;
            Some((image, state))
        })
    }
}

impl CrawlState {
    async fn next_image(&mut self) -> Option<String> {
        while self.page < self.crawler.page_count {
            if self.crawler.cancel.load(Ordering::SeqCst) {
                info!(page = self.page + 1, "crawl cancelled");
                return None;
            }
            let url = self.next_url.clone()?;
            self.page += 1;

            match self.visit(&url).await {
                Some((image, next)) => {
                    self.failures_in_a_row = 0;
                    self.next_url = next;
                    debug!(page = self.page, image = %image, "crawled page");
                    return Some(image);
                }
                None => {
                    self.failures_in_a_row += 1;
                    warn!(page = self.page, url = %url, "skipping page");
                    if self.failures_in_a_row >= MAX_CONSECUTIVE_PAGE_FAILURES {
                        warn!(
                            failures = self.failures_in_a_row,
                            "too many unreadable pages in a row, ending crawl"
                        );
                        return None;
                    }
                }
            }
        }
        None
    }

    /// Fetches one reader page; `None` when it cannot be used.
    async fn visit(&self, url: &str) -> Option<(String, Option<String>)> {
        let html = match self.crawler.fetcher.fetch(url).await {
            Ok(response) => response.text(),
            Err(error) => {
                warn!(page = self.page, error = %error, "page fetch failed");
                return None;
            }
        };
        let page = parser::parse_reader_page(&html)?;
        let image = parser::absolutize(&self.crawler.base, &page.image_src).ok()?;
        let next = page
            .next_href
            .and_then(|href| parser::absolutize(&self.crawler.base, &href).ok());
        Some((image, next))
    }
}
