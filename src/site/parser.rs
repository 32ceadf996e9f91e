//! HTML extraction for the gallery index page and the reader pages.
//!
//! `scraper::Html` is not `Send`, so every function here parses, extracts
//! owned strings and drops the document before returning. Async callers never
//! hold a parsed document across an `.await`.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::ValidationError;
use super::taxonomy::{Taxonomy, UNKNOWN_CODE};

#[allow(clippy::expect_used)]
fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("h2"));
static PIC_BOX: LazyLock<Selector> = LazyLock::new(|| selector("div.pic_box"));
static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static LABEL: LazyLock<Selector> = LazyLock::new(|| selector("label"));
static BREADCRUMB_LINK: LazyLock<Selector> = LazyLock::new(|| selector("div.png.bread a"));
static SAMPLE_IMAGE: LazyLock<Selector> = LazyLock::new(|| selector("img#picarea"));
static READER_IMAGE: LazyLock<Selector> = LazyLock::new(|| selector("span#imgarea a img"));
static NEXT_PAGE_LINK: LazyLock<Selector> = LazyLock::new(|| selector("div.newpage a"));

#[allow(clippy::expect_used)]
static DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("digit regex is valid"));

/// Label marking the page-count field on the index page.
const PAGE_COUNT_MARKER: &str = "頁數";

/// Everything the index page tells us before the sample image is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPage {
    /// Gallery title (first `<h2>`).
    pub title: String,
    /// Category code from the second breadcrumb link.
    pub category: String,
    /// Language code from the third breadcrumb link.
    pub subcategory: String,
    /// Declared number of pages.
    pub page_count: usize,
    /// Absolute URL of the first reader page (crawl start).
    pub first_page_url: String,
    /// Absolute URL of the reader page holding the sample image.
    pub sample_page_url: String,
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Resolves `href` against `base`; protocol-relative links become `https:`.
pub fn absolutize(base: &Url, href: &str) -> Result<String, ValidationError> {
    let href = href.trim();
    if let Some(rest) = href.strip_prefix("//") {
        return Ok(format!("https://{rest}"));
    }
    base.join(href)
        .map(String::from)
        .map_err(|source| ValidationError::InvalidUrl {
            url: href.to_string(),
            source,
        })
}

/// Extracts title, links, page count and taxonomy from the gallery index page.
///
/// # Errors
///
/// Returns the [`ValidationError`] naming the first missing element.
pub fn parse_index_page(
    html: &str,
    base: &Url,
    taxonomy: &Taxonomy,
) -> Result<IndexPage, ValidationError> {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
        .ok_or(ValidationError::MissingTitle)?;

    let pic_boxes: Vec<ElementRef<'_>> = document.select(&PIC_BOX).collect();
    let (Some(first_box), Some(last_box)) = (pic_boxes.first(), pic_boxes.last()) else {
        return Err(ValidationError::MissingPicBox);
    };
    let first_href = first_box
        .select(&LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
        .ok_or(ValidationError::MissingPageLink)?;
    let sample_href = last_box
        .select(&LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
        .ok_or(ValidationError::MissingPageLink)?;

    let page_count = document
        .select(&LABEL)
        .map(text_of)
        .find(|text| text.contains(PAGE_COUNT_MARKER))
        .and_then(|text| DIGITS.find(&text).and_then(|m| m.as_str().parse().ok()))
        .ok_or(ValidationError::MissingPageCount)?;

    let crumbs: Vec<String> = document.select(&BREADCRUMB_LINK).map(text_of).collect();
    if crumbs.is_empty() {
        return Err(ValidationError::MissingBreadcrumb);
    }
    let category = crumbs
        .get(1)
        .map(|label| taxonomy.category(label).to_string())
        .ok_or(ValidationError::MissingCategory)?;
    let subcategory = crumbs
        .get(2)
        .map_or(UNKNOWN_CODE, |label| taxonomy.language(label))
        .to_string();

    Ok(IndexPage {
        title,
        category,
        subcategory,
        page_count,
        first_page_url: absolutize(base, first_href)?,
        sample_page_url: absolutize(base, sample_href)?,
    })
}

/// Extracts the `img#picarea` source from a reader page.
#[must_use]
pub fn parse_sample_image(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&SAMPLE_IMAGE)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::to_string)
}

/// One reader page: its image and the link to the following page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderPage {
    /// Raw `src` of the page image.
    pub image_src: String,
    /// Raw `href` of the last "next page" link, if any.
    pub next_href: Option<String>,
}

/// Extracts the page image and next-page link from a reader page.
#[must_use]
pub fn parse_reader_page(html: &str) -> Option<ReaderPage> {
    let document = Html::parse_document(html);
    let image_src = document
        .select(&READER_IMAGE)
        .next()
        .and_then(|img| img.value().attr("src"))?
        .to_string();
    let next_href = document
        .select(&NEXT_PAGE_LINK)
        .filter_map(|a| a.value().attr("href"))
        .last()
        .map(str::to_string);
    Some(ReaderPage {
        image_src,
        next_href,
    })
}
