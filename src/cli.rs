//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use wgrabber::DownloadMode;

/// Base folder used when neither the CLI nor the config file sets one.
pub const DEFAULT_FOLDER: &str = "~/Hmanga/";

/// Download a gallery's page images and pack them into a `.cbz` archive.
///
/// Pages are saved under `<FOLDER>/<category>/<language>/<title>/` and the
/// archive is written next to them as `<title>.cbz`.
#[derive(Parser, Debug)]
#[command(name = "wgrabber")]
#[command(author, version, about)]
pub struct Args {
    /// Gallery index page URL
    pub url: String,

    /// Base folder for galleries [default: ~/Hmanga/]
    #[arg(long)]
    pub folder: Option<PathBuf>,

    /// How page URLs are found [default: crawl]
    ///
    /// `crawl` walks reader pages, `normal` infers them from one image name.
    #[arg(long)]
    pub mode: Option<DownloadMode>,

    /// Keep only the archive and delete the page images after compression
    #[arg(long)]
    pub zip_only: bool,

    /// Concurrent image downloads (1-16) [default: 3]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub concurrency: Option<u8>,

    /// Disable the adaptive delay between requests
    #[arg(long)]
    pub no_delay: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
