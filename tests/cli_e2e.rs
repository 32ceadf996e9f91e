//! End-to-end CLI tests for the wgrabber binary.

use std::net::TcpListener;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

mod support;
use support::socket_guard::start_mock_server_or_skip;

/// Command with an isolated config directory so a user config never leaks in.
fn wgrabber(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("wgrabber").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("RUST_LOG");
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let config = TempDir::new().unwrap();
    wgrabber(&config)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("cbz"))
        .stdout(predicate::str::contains("--zip-only"))
        .stdout(predicate::str::contains("--mode"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let config = TempDir::new().unwrap();
    wgrabber(&config)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("wgrabber"));
}

/// Test that the gallery URL is required.
#[test]
fn test_binary_without_url_fails() {
    let config = TempDir::new().unwrap();
    wgrabber(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("<URL>"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let config = TempDir::new().unwrap();
    wgrabber(&config)
        .args(["https://www.site.example/a.html", "--invalid-flag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

/// Test that a broken config file is reported instead of silently ignored.
#[test]
fn test_binary_invalid_config_fails() {
    let config = TempDir::new().unwrap();
    let dir = config.path().join("wgrabber");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), "concurrency = 99\n").unwrap();

    wgrabber(&config)
        .args(["https://www.site.example/a.html", "--no-delay", "-q"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency"));
}

/// Test that an unrecognized start page is reported and exits with code 0.
#[tokio::test]
async fn test_binary_unrecognized_url_exits_zero() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let config = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let url = format!("{}/not-a-gallery.html", server.uri());
    let mut cmd = wgrabber(&config);
    cmd.arg(&url)
        .arg("--folder")
        .arg(output.path())
        .arg("--no-delay");

    let assert = tokio::task::spawn_blocking(move || cmd.assert())
        .await
        .unwrap();
    assert
        .success()
        .stderr(predicate::str::contains("The start url is not recognized."));
    assert_eq!(std::fs::read_dir(output.path()).unwrap().count(), 0);
}

/// Test that an unreachable origin is a fatal error.
#[test]
fn test_binary_unreachable_origin_fails() {
    let port = {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0") else {
            eprintln!("cannot bind localhost socket; skipping");
            return;
        };
        listener.local_addr().unwrap().port()
    };
    let config = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();

    wgrabber(&config)
        .arg(format!("http://127.0.0.1:{port}/gallery.html"))
        .arg("--folder")
        .arg(output.path())
        .arg("--no-delay")
        .assert()
        .failure()
        .stderr(predicate::str::contains("gallery download failed"));
}
