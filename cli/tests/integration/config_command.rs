//! Integration tests for `keel config` command.
//!
//! All filesystem-touching tests set `KEEL_CONFIG` to a temp path so they
//! never read or write `~/.keel/config.yaml`.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn keel() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("keel"));
    cmd.env("NO_COLOR", "1");
    cmd
}

/// Returns a `TempDir` and the path string for a config file inside it.
fn temp_config_path() -> (TempDir, String) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir
        .path()
        .join("config.yaml")
        .to_string_lossy()
        .into_owned();
    (dir, path)
}

#[test]
fn test_config_help_shows_show_and_set_subcommands() {
    keel()
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("show"))
        .stdout(predicate::str::contains("set"));
}

#[test]
fn test_config_show_without_file_uses_defaults() {
    let (_dir, path) = temp_config_path();
    keel()
        .args(["config", "show"])
        .env("KEEL_CONFIG", &path)
        .assert()
        .success()
        .stdout(predicate::str::contains("provisioning.server_type:"))
        .stdout(predicate::str::contains("cx22"))
        .stdout(predicate::str::contains("(built-in)"));
}

#[test]
fn test_config_show_json_includes_path_and_config() {
    let (_dir, path) = temp_config_path();
    let out = keel()
        .args(["config", "show", "--json"])
        .env("KEEL_CONFIG", &path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&out).expect("valid JSON");
    assert_eq!(value["path"], path.as_str());
    assert_eq!(value["config"]["ssh"]["user"], "root");
}

#[test]
fn test_config_set_persists_value() {
    let (_dir, path) = temp_config_path();
    keel()
        .args(["config", "set", "provisioning.location", "nbg1"])
        .env("KEEL_CONFIG", &path)
        .assert()
        .success()
        .stdout(predicate::str::contains("provisioning.location"));

    let content = std::fs::read_to_string(&path).expect("config written");
    assert!(content.contains("nbg1"));

    keel()
        .args(["config", "show"])
        .env("KEEL_CONFIG", &path)
        .assert()
        .success()
        .stdout(predicate::str::contains("nbg1"));
}

#[test]
fn test_config_set_unknown_key_fails() {
    let (_dir, path) = temp_config_path();
    keel()
        .args(["config", "set", "provisioning.colour", "blue"])
        .env("KEEL_CONFIG", &path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown setting"));
    assert!(!std::path::Path::new(&path).exists());
}

#[test]
fn test_config_set_invalid_value_json_error() {
    let (_dir, path) = temp_config_path();
    let out = keel()
        .args(["config", "set", "store.fetch_concurrency", "0", "--json"])
        .env("KEEL_CONFIG", &path)
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&out).expect("valid JSON");
    assert_eq!(value["code"], "config");
    assert!(
        value["message"]
            .as_str()
            .expect("message")
            .contains("store.fetch_concurrency")
    );
}

#[test]
fn test_config_show_rejects_malformed_file() {
    let (_dir, path) = temp_config_path();
    std::fs::write(&path, "store: 42\n").expect("write");
    keel()
        .args(["config", "show"])
        .env("KEEL_CONFIG", &path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot parse"));
}
