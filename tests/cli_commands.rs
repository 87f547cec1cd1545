use std::fs;
use std::process::Command;

use assert_cmd::prelude::*;
use serde_json::Value;

fn write_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("mobisync.yaml");
    fs::write(
        &path,
        r#"
timeouts:
  active_profile: slow-device
  profiles:
    - name: slow-device
      description: Older handsets
      config:
        global: 20000
        operation:
          click: 8000
          scroll: 15000
"#,
    )
    .unwrap();
    path
}

fn mobisync() -> Command {
    let mut cmd = Command::cargo_bin("mobisync").unwrap();
    for (key, _) in std::env::vars() {
        if key.starts_with("MOBISYNC") {
            cmd.env_remove(key);
        }
    }
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn resolve_uses_configured_profile() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir);

    let assert = mobisync()
        .args(["--config", config.to_str().unwrap(), "--output", "json"])
        .args(["resolve", "--operation", "scroll"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let value: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["timeoutMs"].as_u64(), Some(15_000));
    assert_eq!(value["profile"].as_str(), Some("slow-device"));

    let assert = mobisync()
        .args(["--config", config.to_str().unwrap()])
        .args(["resolve", "--operation", "click", "--profile", "default"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert_eq!(stdout.trim(), "click: 5000ms (profile default)");
}

#[test]
fn resolve_rejects_unknown_profile() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir);

    let assert = mobisync()
        .args(["--config", config.to_str().unwrap()])
        .args(["resolve", "--operation", "click", "--profile", "turbo"])
        .assert()
        .failure();
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).unwrap();
    assert!(stderr.contains("unknown timeout profile 'turbo'"), "{stderr}");
}

#[test]
fn profiles_and_config_commands() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir);

    let assert = mobisync()
        .args(["--config", config.to_str().unwrap(), "--log-level", "warn"])
        .arg("profiles")
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("  default (global 10000ms)"), "{stdout}");
    assert!(stdout.contains("* slow-device (global 20000ms) - Older handsets"), "{stdout}");

    let assert = mobisync()
        .args(["--config", config.to_str().unwrap(), "--output", "yaml"])
        .args(["config", "--section", "polling"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let polling: serde_yaml::Value = serde_yaml::from_str(&stdout).unwrap();
    assert_eq!(polling["interval_ms"].as_u64(), Some(500));
    assert_eq!(polling["strict_by_default"].as_bool(), Some(true));
}
