//! CLI entry point for wgrabber.

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use wgrabber::download::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY,
    READ_TIMEOUT_SECS,
};
use wgrabber::{
    DEFAULT_CONCURRENCY, GalleryError, Grabber, GrabberSettings, RateConfig, RateController,
    ReqwestSessionFactory, RetryProfile, RetryingFetcher, Session, SitePageFetcher, Taxonomy,
};

mod app_config;
mod cli;
mod progress;

use app_config::FileConfig;
use cli::{Args, DEFAULT_FOLDER};
use progress::ProgressBarSink;

/// Everything the run needs after CLI flags and the config file are merged.
#[derive(Debug, Clone, PartialEq)]
struct RunOptions {
    settings: GrabberSettings,
    rate: Option<RateConfig>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

/// Merges CLI flags over config file values over built-in defaults.
fn resolve_options(args: &Args, file: &FileConfig) -> RunOptions {
    let folder = args
        .folder
        .clone()
        .or_else(|| file.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FOLDER));

    let mut settings = GrabberSettings::new(app_config::expand_home(&folder));
    settings.mode = args.mode.or(file.mode).unwrap_or_default();
    settings.zip_only = args.zip_only || file.zip_only.unwrap_or(false);
    settings.concurrency = args
        .concurrency
        .map(usize::from)
        .or(file.concurrency)
        .unwrap_or(DEFAULT_CONCURRENCY);

    let rate = (!args.no_delay).then(|| {
        RateConfig::with_bounds(
            file.min_delay_secs.map_or(DEFAULT_MIN_DELAY, Duration::from_secs_f64),
            file.max_delay_secs.map_or(DEFAULT_MAX_DELAY, Duration::from_secs_f64),
            file.initial_delay_secs.map_or(DEFAULT_INITIAL_DELAY, Duration::from_secs_f64),
        )
    });

    RunOptions {
        settings,
        rate,
        connect_timeout: Duration::from_secs(
            file.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS),
        ),
        read_timeout: Duration::from_secs(file.read_timeout_secs.unwrap_or(READ_TIMEOUT_SECS)),
    }
}

fn taxonomy_from(file: &FileConfig) -> Taxonomy {
    let mut taxonomy = Taxonomy::default();
    for (label, code) in &file.categories {
        taxonomy.insert_category(label.as_str(), code.as_str());
    }
    for (label, code) in &file.languages {
        taxonomy.insert_language(label.as_str(), code.as_str());
    }
    taxonomy
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = app_config::load_default_file_config()?;
    if let (Some(path), Some(_)) = (&loaded.path, &loaded.config) {
        debug!(path = %path.display(), "loaded config file");
    }
    let file = loaded.config.unwrap_or_default();
    let options = resolve_options(&args, &file);
    info!(
        folder = %options.settings.base_dir.display(),
        mode = %options.settings.mode,
        concurrency = options.settings.concurrency,
        zip_only = options.settings.zip_only,
        "wgrabber starting"
    );

    let rate = Arc::new(match options.rate.clone() {
        Some(config) => RateController::new(config),
        None => {
            warn!("request pacing disabled, the origin may start blocking");
            RateController::disabled()
        }
    });
    let factory = Arc::new(ReqwestSessionFactory::new(
        options.connect_timeout,
        options.read_timeout,
    ));
    let session = Arc::new(Session::new(factory).context("failed to create HTTP session")?);

    let pages = SitePageFetcher::new(
        RetryingFetcher::new(Arc::clone(&session), Arc::clone(&rate), RetryProfile::template()),
        taxonomy_from(&file),
    );

    let interrupted = Arc::new(AtomicBool::new(false));
    let signal_flag = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_flag.store(true, Ordering::SeqCst);
            warn!("interrupt received, finishing pages in flight");
        }
    });

    let mut grabber = Grabber::new(session, rate, Arc::new(pages), options.settings)
        .with_cancel_flag(Arc::clone(&interrupted));
    if progress::should_use_progress_bar(
        io::stderr().is_terminal(),
        args.quiet,
        progress::is_dumb_terminal(),
    ) {
        grabber = grabber.with_progress(Arc::new(ProgressBarSink::new()));
    }

    let outcome = match grabber.grab(&args.url).await {
        Ok(outcome) => outcome,
        Err(GalleryError::Validation(reason)) => {
            eprintln!("The start url is not recognized.");
            eprintln!("{reason}");
            return Ok(ExitCode::SUCCESS);
        }
        Err(error) => return Err(error).context("gallery download failed"),
    };

    println!("{}", outcome.summary.report());
    match &outcome.archive {
        Some(path) => println!("Archive: {}", path.display()),
        None => println!("No pages were saved; no archive written."),
    }
    if interrupted.load(Ordering::SeqCst) {
        info!("run was interrupted");
        return Ok(ExitCode::from(130));
    }
    if outcome.summary.saved().is_empty() && !outcome.summary.is_empty() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wgrabber::DownloadMode;

    use super::*;

    const URL: &str = "https://www.site.example/photos-index-aid-1.html";

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["wgrabber", URL];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_resolve_options_defaults() {
        let options = resolve_options(&args(&[]), &FileConfig::default());
        assert_eq!(options.settings.mode, DownloadMode::Crawl);
        assert_eq!(options.settings.concurrency, DEFAULT_CONCURRENCY);
        assert!(!options.settings.zip_only);
        assert!(options.settings.base_dir.ends_with("Hmanga"));
        assert_eq!(options.rate, Some(RateConfig::default()));
        assert_eq!(options.connect_timeout, Duration::from_secs(CONNECT_TIMEOUT_SECS));
        assert_eq!(options.read_timeout, Duration::from_secs(READ_TIMEOUT_SECS));
    }

    #[test]
    fn test_resolve_options_file_values_apply() {
        let file = FileConfig {
            output_dir: Some(PathBuf::from("/srv/galleries")),
            mode: Some(DownloadMode::Normal),
            zip_only: Some(true),
            concurrency: Some(6),
            min_delay_secs: Some(1.0),
            max_delay_secs: Some(4.0),
            initial_delay_secs: Some(2.5),
            connect_timeout_secs: Some(5),
            read_timeout_secs: Some(60),
            ..FileConfig::default()
        };
        let options = resolve_options(&args(&[]), &file);
        assert_eq!(options.settings.base_dir, PathBuf::from("/srv/galleries"));
        assert_eq!(options.settings.mode, DownloadMode::Normal);
        assert!(options.settings.zip_only);
        assert_eq!(options.settings.concurrency, 6);
        let rate = options.rate.unwrap();
        assert_eq!(rate.min_delay, Duration::from_secs(1));
        assert_eq!(rate.max_delay, Duration::from_secs(4));
        assert_eq!(rate.initial_delay, Duration::from_millis(2500));
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert_eq!(options.read_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_resolve_options_cli_overrides_file() {
        let file = FileConfig {
            output_dir: Some(PathBuf::from("/srv/galleries")),
            mode: Some(DownloadMode::Normal),
            concurrency: Some(6),
            ..FileConfig::default()
        };
        let options = resolve_options(
            &args(&["--folder", "/tmp/g", "--mode", "crawl", "-c", "2", "--no-delay"]),
            &file,
        );
        assert_eq!(options.settings.base_dir, PathBuf::from("/tmp/g"));
        assert_eq!(options.settings.mode, DownloadMode::Crawl);
        assert_eq!(options.settings.concurrency, 2);
        assert!(options.rate.is_none());
    }

    #[test]
    fn test_taxonomy_from_config_adds_labels() {
        let file = FileConfig {
            categories: vec![("同人誌".to_string(), "doujin".to_string())],
            languages: vec![("漢化".to_string(), "CN".to_string())],
            ..FileConfig::default()
        };
        let taxonomy = taxonomy_from(&file);
        assert_eq!(taxonomy.category("同人誌"), "doujin");
        assert_eq!(taxonomy.language("漢化"), "CN");
    }
}
