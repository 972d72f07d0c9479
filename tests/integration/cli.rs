//! Tests for the dpconsole binary.

use std::fs;

use assert_cmd::Command;
use dpconsole::server::AppState;
use predicates::prelude::*;
use tempfile::TempDir;

use crate::collaborators::start_catalog;
use crate::support::TestServer;

/// Get a Command instance for the dpconsole binary, isolated from any
/// dpconsole.toml or DPCONSOLE__* variables of the caller.
#[allow(deprecated)]
fn dpconsole_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dpconsole").expect("Failed to find dpconsole binary");
    cmd.current_dir(dir.path()).env("RUST_LOG", "off");
    for (key, _) in std::env::vars() {
        if key.starts_with("DPCONSOLE__") {
            cmd.env_remove(key);
        }
    }
    cmd
}

#[test]
fn test_help_lists_commands() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    dpconsole_cmd(&temp_dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("scopes"))
        .stdout(predicate::str::contains("datasets"))
        .stdout(predicate::str::contains("preview"));
}

#[test]
fn test_config_show_merges_file_and_environment() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    fs::write(
        temp_dir.path().join("dpconsole.toml"),
        "[api]\nbase_url = \"https://dp.example.org/api\"\n\n[jobs]\nmax_epsilon_per_job = 2.5\n",
    )
    .expect("Failed to write config");

    dpconsole_cmd(&temp_dir)
        .env("DPCONSOLE__PREVIEW__DEBOUNCE_MS", "250")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://dp.example.org/api"))
        .stdout(predicate::str::contains("debounce_ms = 250"))
        .stdout(predicate::str::contains("max_epsilon_per_job = 2.5"));
}

#[test]
fn test_explicit_missing_config_fails() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    dpconsole_cmd(&temp_dir)
        .args(["--config", "absent.toml", "config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_reset_requires_confirmation() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    dpconsole_cmd(&temp_dir)
        .args(["scopes", "reset", "ds_001"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be undone"));
}

#[test]
fn test_degenerate_preview_is_not_dispatched() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    // Nothing listens here; a dispatched request would fail with a transport error.
    dpconsole_cmd(&temp_dir)
        .args([
            "--api-url",
            "http://127.0.0.1:9/api",
            "preview",
            "--dataset",
            "ds_001",
            "--column",
            "amount",
            "--metric",
            "mean",
            "--epsilon",
            "0",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("epsilon must be positive"));
}

#[test]
fn test_unknown_metric_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    dpconsole_cmd(&temp_dir)
        .args([
            "job", "submit", "--dataset", "ds_001", "--metric", "median", "--epsilon", "1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown metric"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scopes_against_running_server() {
    let server = TestServer::start(AppState::in_memory()).await;
    let base_url = server.base_url();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let mut create = dpconsole_cmd(&temp_dir);
    create.args([
        "--api-url",
        base_url.as_str(),
        "scopes",
        "create",
        "ds_001",
        "--name",
        "customer_events",
        "--epsilon",
        "10",
    ]);
    tokio::task::spawn_blocking(move || {
        create
            .assert()
            .success()
            .stdout(predicate::str::contains("customer_events"));
    })
    .await
    .expect("create command");

    server
        .state
        .ledger
        .consume("ds_001", 8.5, 0.0)
        .await
        .expect("consume");

    let mut list = dpconsole_cmd(&temp_dir);
    list.args(["--api-url", base_url.as_str(), "scopes", "list"]);
    tokio::task::spawn_blocking(move || {
        list.assert()
            .success()
            .stdout(predicate::str::contains("ds_001"))
            .stdout(predicate::str::contains("Critical"));
    })
    .await
    .expect("list command");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_datasets_against_catalog() {
    let server = start_catalog().await;
    let base_url = server.base_url();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let mut show = dpconsole_cmd(&temp_dir);
    show.args(["--api-url", base_url.as_str(), "datasets", "show", "ds_001"]);
    let mut missing = dpconsole_cmd(&temp_dir);
    missing.args(["--api-url", base_url.as_str(), "datasets", "show", "ds_404"]);
    let mut list = dpconsole_cmd(&temp_dir);
    list.args(["--api-url", base_url.as_str(), "datasets", "list"]);

    tokio::task::spawn_blocking(move || {
        show.assert()
            .success()
            .stdout(predicate::str::contains("customer_events"))
            .stdout(predicate::str::contains("amount"))
            .stdout(predicate::str::contains("categorical"));
        missing
            .assert()
            .failure()
            .stderr(predicate::str::contains("Dataset not found"));
        list.assert()
            .success()
            .stdout(predicate::str::contains("payroll"))
            .stdout(predicate::str::contains("125000"));
    })
    .await
    .expect("datasets commands");
}
