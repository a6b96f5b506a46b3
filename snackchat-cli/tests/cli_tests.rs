//! Integration tests for the CLI binary.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::{PredicateBooleanExt, predicate};
use server::server::{create_app_router, create_app_state, metrics_handle};
use shared::config::server::{Config, Profile};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;

/// Serves the relay in-process and returns its base URL.
async fn spawn_server() -> String {
    let config = Arc::new(Config::default_for_profile(Profile::Test));
    let state = create_app_state(config.clone(), None);
    let app = create_app_router(state, config, metrics_handle());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

#[test]
fn help_lists_chat_commands() {
    cargo_bin_cmd!("cli")
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("chat")
                .and(predicate::str::contains("send"))
                .and(predicate::str::contains("history"))
                .and(predicate::str::contains("grant"))
                .and(predicate::str::contains("nick")),
        );
}

#[test]
fn nick_then_whoami_shows_the_saved_name() {
    let dir = tempfile::tempdir().unwrap();
    let identity = dir.path().join("identity.json");

    cargo_bin_cmd!("cli")
        .args(["nick", "Ana", "--identity"])
        .arg(&identity)
        .assert()
        .success()
        .stdout(predicate::str::contains("display name set to Ana"));

    cargo_bin_cmd!("cli")
        .arg("whoami")
        .arg("--identity")
        .arg(&identity)
        .assert()
        .success()
        .stdout(predicate::str::contains("display name: Ana"));
}

#[test]
fn blank_nick_is_rejected() {
    let dir = tempfile::tempdir().unwrap();

    cargo_bin_cmd!("cli")
        .args(["nick", "   ", "--identity"])
        .arg(dir.path().join("identity.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("display name must not be empty"));
}

#[test]
fn send_without_a_display_name_fails_before_any_request() {
    let dir = tempfile::tempdir().unwrap();

    cargo_bin_cmd!("cli")
        .args(["send", "hello", "--server", "http://127.0.0.1:9/", "--identity"])
        .arg(dir.path().join("identity.json"))
        .timeout(Duration::from_secs(10))
        .assert()
        .failure()
        .stderr(predicate::str::contains("no display name set"));
}

#[test]
fn history_against_an_unreachable_server_fails() {
    cargo_bin_cmd!("cli")
        .args(["history", "--server", "http://127.0.0.1:9/"])
        .timeout(Duration::from_secs(10))
        .assert()
        .failure()
        .stderr(predicate::str::contains("relay request failed"));
}

#[test]
fn config_writes_the_requested_format() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("relay.toml");

    cargo_bin_cmd!("cli")
        .args(["config", "--format", "toml", "--profile", "prod", "--output"])
        .arg(&output)
        .assert()
        .success();

    let written = std::fs::read_to_string(output).unwrap();
    assert!(written.contains("profile = \"prod\""));
}

#[test]
fn completion_emits_a_bash_script() {
    cargo_bin_cmd!("cli")
        .args(["completion", "--shell", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("_snackchat"));
}

#[tokio::test(flavor = "multi_thread")]
async fn send_and_chat_go_through_a_live_relay() {
    let base = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let identity = dir.path().join("identity.json");

    tokio::task::spawn_blocking(move || {
        cargo_bin_cmd!("cli")
            .args(["nick", "Ana", "--identity"])
            .arg(&identity)
            .assert()
            .success();

        cargo_bin_cmd!("cli")
            .args(["send", "  hi there  ", "--server", &base, "--identity"])
            .arg(&identity)
            .timeout(Duration::from_secs(20))
            .assert()
            .success()
            .stdout(predicate::str::starts_with("sent "));

        cargo_bin_cmd!("cli")
            .args(["chat", "--server", &base, "--identity"])
            .arg(&identity)
            .write_stdin("second\n/who\n/quit\n")
            .timeout(Duration::from_secs(20))
            .assert()
            .success()
            .stdout(predicate::str::contains("] Ana:   hi there  "))
            .stderr(predicate::str::contains("here: Ana"));

        cargo_bin_cmd!("cli")
            .args(["history", "--json", "--server", &base])
            .timeout(Duration::from_secs(10))
            .assert()
            .success()
            .stdout(
                predicate::str::contains("\"content\": \"  hi there  \"")
                    .and(predicate::str::contains("\"content\": \"second\"")),
            );
    })
    .await
    .unwrap();
}
