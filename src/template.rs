//! Naming-convention inference for gallery image URLs.
//!
//! A gallery usually names its pages with a zero-padded running index, e.g.
//! `00000000000003.jpg`. Given one observed image URL, [`UrlTemplate`] finds the
//! digit runs in its final path segment, replaces each one with a positional
//! placeholder, and remembers the width of the run so the index can be padded
//! back to the same shape.
//!
//! # Example
//!
//! ```
//! use wgrabber::template::UrlTemplate;
//!
//! let template = UrlTemplate::parse("//img.example/data/1017/49/15937042073157.jpg").unwrap();
//! let urls: Vec<String> = template.normal_urls(2).collect();
//! assert_eq!(urls[0], "//img.example/data/1017/49/00000000000000.jpg");
//! assert_eq!(urls.len(), 3);
//! ```

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

/// Maximal runs of ASCII decimal digits.
#[allow(clippy::expect_used)]
static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("[0-9]+").expect("digit-run regex is valid") // Static pattern, safe to panic
});

/// Marker characters probed after the zero-index filename, in probe order.
///
/// Lowercase `a..g`, then uppercase `A..G`, then digits `0..6`.
pub const SPECIAL_SUFFIXES: [char; 21] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'A', 'B', 'C', 'D', 'E', 'F', 'G', '0', '1', '2', '3',
    '4', '5', '6',
];

/// Separators probed between the zero-index filename and a marker character.
pub const SPECIAL_SEPARATORS: [&str; 3] = ["", "-", "_"];

/// Errors raised while inferring a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The filename carries no number to anchor a page index on.
    #[error("no page number found in sample image filename: {url}")]
    NoDigitRun {
        /// The sample URL that was inspected.
        url: String,
    },
}

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// Placeholder `var{n}`; holds the zero-padding width of the replaced run.
    Placeholder(usize),
}

/// A URL with its page-number digit runs replaced by positional placeholders.
///
/// Immutable once parsed; enumeration methods return fresh iterators, so the
/// sequences can be restarted any number of times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    segments: Vec<Segment>,
}

impl UrlTemplate {
    /// Builds a template from a sample image URL.
    ///
    /// Only the final path segment is scanned, so numeric directory names
    /// (`/data/1017/49/`) stay literal.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::NoDigitRun`] if the filename contains no digits.
    pub fn parse(sample_url: &str) -> Result<Self, TemplateError> {
        let filename_start = sample_url.rfind('/').map_or(0, |pos| pos + 1);
        let (prefix, filename) = sample_url.split_at(filename_start);

        let mut segments = vec![Segment::Literal(prefix.to_string())];
        let mut cursor = 0;
        for run in DIGIT_RUN.find_iter(filename) {
            if run.start() > cursor {
                segments.push(Segment::Literal(filename[cursor..run.start()].to_string()));
            }
            segments.push(Segment::Placeholder(run.len()));
            cursor = run.end();
        }
        if cursor < filename.len() {
            segments.push(Segment::Literal(filename[cursor..].to_string()));
        }

        let template = Self { segments };
        if template.placeholder_count() == 0 {
            return Err(TemplateError::NoDigitRun {
                url: sample_url.to_string(),
            });
        }

        debug!(
            template = %template.pattern(),
            widths = ?template.digit_widths(),
            "inferred url template"
        );
        Ok(template)
    }

    /// Returns the template text with placeholders rendered as `{var0}`, `{var1}`, ...
    #[must_use]
    pub fn pattern(&self) -> String {
        let mut out = String::new();
        let mut var = 0;
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(_) => {
                    let _ = write!(out, "{{var{var}}}");
                    var += 1;
                }
            }
        }
        out
    }

    /// Returns the original width of every placeholder, left to right.
    #[must_use]
    pub fn digit_widths(&self) -> Vec<usize> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Placeholder(width) => Some(*width),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    fn placeholder_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| matches!(segment, Segment::Placeholder(_)))
            .count()
    }

    /// Yields one URL per page index in `0..=page_count`.
    ///
    /// The bound is inclusive: some sources number one page past the label, and
    /// the extra candidate simply 404s when it does not exist. Every placeholder
    /// receives the same running index.
    pub fn normal_urls(&self, page_count: usize) -> impl Iterator<Item = String> + '_ {
        (0..=page_count).map(move |index| {
            let value = index.to_string();
            self.render(|_, width| pad(&value, width))
        })
    }

    /// Yields the 21 supplementary-image probes for one separator.
    ///
    /// All placeholders are zero; the last one is followed by `separator` and a
    /// marker from [`SPECIAL_SUFFIXES`].
    pub fn special_urls<'a>(&'a self, separator: &'a str) -> impl Iterator<Item = String> + 'a {
        let last = self.placeholder_count().saturating_sub(1);
        SPECIAL_SUFFIXES.into_iter().map(move |suffix| {
            self.render(|position, width| {
                let zero = pad("0", width);
                if position == last {
                    format!("{zero}{separator}{suffix}")
                } else {
                    zero
                }
            })
        })
    }

    /// Yields the normal sequence followed by the special sequence for every
    /// separator in [`SPECIAL_SEPARATORS`].
    pub fn all_candidates(&self, page_count: usize) -> impl Iterator<Item = String> + '_ {
        self.normal_urls(page_count).chain(
            SPECIAL_SEPARATORS
                .into_iter()
                .flat_map(move |separator| self.special_urls(separator)),
        )
    }

    fn render(&self, mut fill: impl FnMut(usize, usize) -> String) -> String {
        let mut out = String::new();
        let mut position = 0;
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(width) => {
                    out.push_str(&fill(position, *width));
                    position += 1;
                }
            }
        }
        out
    }
}

fn pad(value: &str, width: usize) -> String {
    format!("{value:0>width$}")
}
