//! End-to-end CLI tests for the mediafetch binary.

#![allow(clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
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

/// Binary with the config file disabled and throttling off.
fn mediafetch(output: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("mediafetch").unwrap();
    cmd.env_remove("RUST_LOG")
        .arg("--no-config")
        .args(["--throttle-ms", "0", "--min-file-size", "0", "-r", "1"])
        .arg("-o")
        .arg(output.path());
    cmd
}

async fn mount_gallery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/gallery"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body>
                <img src="/img/ok.png">
                <img src="/img/gone.jpg">
            </body></html>"#,
        ))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/ok.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 256]))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/gone.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("mediafetch").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Download the images and videos"))
        .stdout(predicate::str::contains("--workers"));
}

#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("mediafetch").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mediafetch"));
}

#[test]
fn test_binary_requires_page_url() {
    let mut cmd = Command::cargo_bin("mediafetch").unwrap();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("PAGE_URL"));
}

#[test]
fn test_binary_rejects_out_of_range_workers() {
    let mut cmd = Command::cargo_bin("mediafetch").unwrap();
    cmd.args(["-w", "0", "https://example.com/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--workers"));
}

#[test]
fn test_binary_reports_unreadable_config() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("mediafetch").unwrap();
    cmd.arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("https://example.com/")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to load config file"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_list_prints_discovered_assets() {
    let mock_server = require_mock_server!();
    mount_gallery(&mock_server).await;
    let output = TempDir::new().unwrap();

    mediafetch(&output)
        .arg("--list")
        .arg(format!("{}/gallery", mock_server.uri()))
        .assert()
        .success()
        .stdout(predicate::str::contains("/img/ok.png"))
        .stdout(predicate::str::contains("/img/gone.jpg"));

    assert_eq!(std::fs::read_dir(output.path()).map_or(0, Iterator::count), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_partial_success_exits_one() {
    let mock_server = require_mock_server!();
    mount_gallery(&mock_server).await;
    let output = TempDir::new().unwrap();

    mediafetch(&output)
        .arg(format!("{}/gallery", mock_server.uri()))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Downloaded 1 of 2 assets"))
        .stdout(predicate::str::contains("HTTPClientError: 1"));

    assert_eq!(std::fs::read_dir(output.path()).unwrap().count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_json_summary_for_explicit_assets() {
    let mock_server = require_mock_server!();
    mount_gallery(&mock_server).await;
    let output = TempDir::new().unwrap();

    let assert = mediafetch(&output)
        .arg("--json")
        .args(["-a", &format!("{}/img/ok.png", mock_server.uri())])
        .args(["-a", "not a url"])
        .arg(format!("{}/gallery", mock_server.uri()))
        .assert()
        .code(1);

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["summary"]["success_count"], 1);
    assert_eq!(value["summary"]["by_method"]["Direct"], 1);
    assert_eq!(value["summary"]["by_error_class"]["InvalidURL"], 1);
    assert_eq!(value["outcomes"].as_array().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_all_failed_exits_two() {
    let mock_server = require_mock_server!();
    mount_gallery(&mock_server).await;
    let output = TempDir::new().unwrap();

    mediafetch(&output)
        .args(["-a", &format!("{}/img/gone.jpg", mock_server.uri())])
        .arg(format!("{}/gallery", mock_server.uri()))
        .assert()
        .code(2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_single_keeps_file_name() {
    let mock_server = require_mock_server!();
    mount_gallery(&mock_server).await;
    let output = TempDir::new().unwrap();

    mediafetch(&output)
        .arg("--single")
        .arg(format!("{}/img/ok.png", mock_server.uri()))
        .assert()
        .success()
        .stdout(predicate::str::contains("ok.png"));

    assert!(output.path().join("ok.png").exists());
}
