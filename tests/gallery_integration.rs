//! Integration tests for a whole gallery run against a mock origin.
//!
//! The mock server plays the gallery site: an index page, reader pages and
//! page images. Runs use the real reqwest session with pacing disabled.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use wgrabber::{
    DownloadMode, GalleryError, Grabber, GrabberSettings, RateController, ReqwestSessionFactory,
    RetryProfile, RetryingFetcher, Session, SitePageFetcher, Taxonomy, ValidationError,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

// ==================== Helper Functions ====================

fn png_bytes(width: u32) -> Vec<u8> {
    let image = image::RgbImage::new(width, 2);
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

fn index_html(page_count: usize) -> String {
    format!(
        r#"<html><body>
          <div class="png bread">
            <a href="/">首頁</a><a href="/albums-index-cate-5.html">同人誌</a><a href="/albums-index-cate-1.html">漢化</a>
          </div>
          <h2>Test Gallery</h2>
          <div><label>頁數：{page_count}P</label></div>
          <div class="pic_box"><a href="/view-1.html"><img src="/thumb/1.jpg"></a></div>
          <div class="pic_box"><a href="/view-{page_count}.html"><img src="/thumb/{page_count}.jpg"></a></div>
        </body></html>"#
    )
}

/// Reader page usable both as the sample page and as a crawl step.
fn reader_html(image_url: &str, next: Option<&str>) -> String {
    let next = next.map_or(String::new(), |href| format!(r#"<a href="{href}">下一頁</a>"#));
    format!(
        r#"<html><body>
          <span id="imgarea"><a href="/next"><img id="picarea" src="{image_url}"></a></span>
          <div class="newpage">{next}</div>
        </body></html>"#
    )
}

async fn mount_html(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

async fn mount_image(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Mounts a three page gallery whose images are named `001.jpg`..`003.jpg`.
async fn mount_gallery(server: &MockServer) {
    let uri = server.uri();
    mount_html(server, "/gallery.html", index_html(3)).await;
    mount_html(
        server,
        "/view-1.html",
        reader_html(&format!("{uri}/img/001.jpg"), Some("/view-2.html")),
    )
    .await;
    mount_html(
        server,
        "/view-2.html",
        reader_html(&format!("{uri}/img/002.jpg"), Some("/view-3.html")),
    )
    .await;
    mount_html(
        server,
        "/view-3.html",
        reader_html(&format!("{uri}/img/003.jpg"), None),
    )
    .await;
    for (page, width) in [(1, 1), (2, 2), (3, 3)] {
        mount_image(server, &format!("/img/00{page}.jpg"), png_bytes(width)).await;
    }
}

fn grabber(base_dir: &Path, mode: DownloadMode, zip_only: bool) -> Grabber {
    let session = Arc::new(Session::new(Arc::new(ReqwestSessionFactory::default())).unwrap());
    let rate = Arc::new(RateController::disabled());
    let pages = SitePageFetcher::new(
        RetryingFetcher::new(
            Arc::clone(&session),
            Arc::clone(&rate),
            RetryProfile::template().with_max_attempts(1),
        ),
        Taxonomy::default(),
    );
    let mut settings = GrabberSettings::new(base_dir);
    settings.mode = mode;
    settings.zip_only = zip_only;
    settings.concurrency = 2;
    Grabber::new(session, rate, Arc::new(pages), settings)
}

fn archive_entries(path: &Path) -> Vec<(String, u32)> {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let name = entry.name().to_string();
            let mut bytes = Vec::new();
            std::io::Read::read_to_end(&mut entry, &mut bytes).unwrap();
            let width = image::load_from_memory(&bytes).unwrap().width();
            (name, width)
        })
        .collect()
}

// ==================== Inspection Tests ====================

#[tokio::test]
async fn test_inspect_reads_gallery_metadata() {
    let server = require_mock_server!();
    mount_gallery(&server).await;
    let temp = TempDir::new().unwrap();

    let run = grabber(temp.path(), DownloadMode::Crawl, false)
        .inspect(&format!("{}/gallery.html", server.uri()))
        .await
        .unwrap();

    let meta = run.metadata();
    assert_eq!(meta.title, "Test Gallery");
    assert_eq!(meta.category, "doujin");
    assert_eq!(meta.subcategory, "CN");
    assert_eq!(meta.page_count, 3);
    assert_eq!(meta.sample_image_url, format!("{}/img/003.jpg", server.uri()));
    assert_eq!(meta.first_page_url, format!("{}/view-1.html", server.uri()));
    assert_eq!(
        run.directory(),
        temp.path().join("doujin").join("CN").join("Test Gallery")
    );
}

#[tokio::test]
async fn test_unknown_start_page_is_validation_error() {
    let server = require_mock_server!();
    let temp = TempDir::new().unwrap();

    let error = grabber(temp.path(), DownloadMode::Crawl, false)
        .grab(&format!("{}/missing.html", server.uri()))
        .await
        .unwrap_err();

    assert!(error.is_validation());
    assert!(matches!(
        error,
        GalleryError::Validation(ValidationError::Status { status: 404 })
    ));
    // Nothing is created for an unrecognized gallery.
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_start_page_server_error_is_validation_error() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/broken.html"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let temp = TempDir::new().unwrap();

    let error = grabber(temp.path(), DownloadMode::Crawl, false)
        .grab(&format!("{}/broken.html", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        GalleryError::Validation(ValidationError::Status { status: 500 })
    ));
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_page_without_gallery_markup_is_validation_error() {
    let server = require_mock_server!();
    mount_html(&server, "/plain.html", "<html><body><p>hi</p></body></html>".to_string()).await;
    let temp = TempDir::new().unwrap();

    let error = grabber(temp.path(), DownloadMode::Normal, false)
        .grab(&format!("{}/plain.html", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        GalleryError::Validation(ValidationError::MissingTitle)
    ));
}

// ==================== Download Mode Tests ====================

#[tokio::test]
async fn test_crawl_mode_downloads_and_archives_in_page_order() {
    let server = require_mock_server!();
    mount_gallery(&server).await;
    let temp = TempDir::new().unwrap();

    let outcome = grabber(temp.path(), DownloadMode::Crawl, false)
        .grab(&format!("{}/gallery.html", server.uri()))
        .await
        .unwrap();

    assert_eq!(outcome.summary.saved().len(), 3);
    assert!(outcome.summary.failed().is_empty());
    assert!(outcome.summary.missing().is_empty());

    let archive = outcome.archive.unwrap();
    assert_eq!(archive, outcome.directory.join("Test Gallery.cbz"));
    assert_eq!(
        archive_entries(&archive),
        vec![
            ("0.jpg".to_string(), 1),
            ("1.jpg".to_string(), 2),
            ("2.jpg".to_string(), 3)
        ]
    );
    // Pages stay on disk without zip-only.
    assert!(outcome.directory.join("0.jpg").exists());
}

#[tokio::test]
async fn test_normal_mode_enumerates_template_and_skips_missing() {
    let server = require_mock_server!();
    mount_gallery(&server).await;
    let temp = TempDir::new().unwrap();

    let outcome = grabber(temp.path(), DownloadMode::Normal, true)
        .grab(&format!("{}/gallery.html", server.uri()))
        .await
        .unwrap();

    // 000 and every special-suffix candidate are 404 under both extensions.
    let saved: Vec<usize> = outcome.summary.saved().iter().map(|(i, _)| *i).collect();
    assert_eq!(saved, vec![1, 2, 3]);
    assert!(outcome.summary.failed().is_empty());
    assert_eq!(outcome.summary.missing().len(), 4 + 3 * 21 - 3);

    let archive = outcome.archive.unwrap();
    let entries = archive_entries(&archive);
    assert_eq!(
        entries,
        vec![
            ("1.jpg".to_string(), 1),
            ("2.jpg".to_string(), 2),
            ("3.jpg".to_string(), 3)
        ]
    );
    // Zip-only leaves just the archive behind.
    let remaining: Vec<_> = std::fs::read_dir(&outcome.directory)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(remaining, vec![std::ffi::OsString::from("Test Gallery.cbz")]);
}

#[tokio::test]
async fn test_png_fallback_when_jpg_is_missing() {
    let server = require_mock_server!();
    let uri = server.uri();
    mount_html(&server, "/gallery.html", index_html(1)).await;
    mount_html(
        &server,
        "/view-1.html",
        reader_html(&format!("{uri}/img/001.jpg"), None),
    )
    .await;
    mount_image(&server, "/img/001.png", png_bytes(4)).await;
    let temp = TempDir::new().unwrap();

    let outcome = grabber(temp.path(), DownloadMode::Crawl, false)
        .grab(&format!("{uri}/gallery.html"))
        .await
        .unwrap();

    assert_eq!(outcome.summary.saved(), &[(0, "0.png".to_string())]);
    let entries = archive_entries(&outcome.archive.unwrap());
    assert_eq!(entries, vec![("0.png".to_string(), 4)]);
}

#[tokio::test]
async fn test_no_archive_when_nothing_saved() {
    let server = require_mock_server!();
    let uri = server.uri();
    mount_html(&server, "/gallery.html", index_html(1)).await;
    mount_html(
        &server,
        "/view-1.html",
        reader_html(&format!("{uri}/img/001.jpg"), None),
    )
    .await;
    let temp = TempDir::new().unwrap();

    let outcome = grabber(temp.path(), DownloadMode::Crawl, false)
        .grab(&format!("{uri}/gallery.html"))
        .await
        .unwrap();

    assert!(outcome.summary.saved().is_empty());
    assert_eq!(outcome.summary.missing().len(), 1);
    assert!(outcome.archive.is_none());
    assert!(!outcome.directory.join("Test Gallery.cbz").exists());
}
