//! Instance commands that fail before any provider call.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct Env {
    dir: TempDir,
}

impl Env {
    fn empty() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    fn with_file_backend() -> Self {
        let env = Self::empty();
        let backend = format!("file://{}", env.dir.path().join("state").display());
        env.cmd()
            .args(["config", "new", "work", "--state-backend", &backend])
            .assert()
            .success();
        env
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("privatebox"));
        cmd.env("NO_COLOR", "1")
            .env("PRIVATEBOX_CONFIG", self.dir.path().join("config.yaml"))
            .env_remove("PRIVATEBOX_PROFILE")
            .env_remove("PRIVATEBOX_YES");
        cmd
    }
}

#[test]
fn test_list_without_config_explains_setup() {
    Env::empty()
        .cmd()
        .arg("list")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No configuration profiles"));
}

#[test]
fn test_list_json_empty_backend_is_empty_array() {
    let output = Env::with_file_backend()
        .cmd()
        .args(["--json", "list"])
        .output()
        .expect("run");
    assert!(output.status.success());
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(v, serde_json::json!([]));
}

#[test]
fn test_list_human_empty_backend() {
    Env::with_file_backend()
        .cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No instances found."));
}

#[test]
fn test_show_unknown_instance_is_not_provisioned() {
    Env::with_file_backend()
        .cmd()
        .args(["--json", "show", "ghost"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("NOT_PROVISIONED"))
        .stdout(predicate::str::contains("privatebox create ghost"));
}

#[test]
fn test_destroy_unknown_instance_is_not_provisioned() {
    Env::with_file_backend()
        .cmd()
        .args(["--json", "destroy", "ghost", "--yes"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("NOT_PROVISIONED"));
}

#[test]
fn test_start_unknown_instance_is_not_provisioned() {
    Env::with_file_backend()
        .cmd()
        .args(["start", "ghost"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("is not provisioned"));
}

#[test]
fn test_create_rejects_invalid_name() {
    Env::with_file_backend()
        .cmd()
        .args(["--json", "create", "bad/name"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("BUILD_ERROR"));
}

#[test]
fn test_connect_with_nothing_running() {
    Env::with_file_backend()
        .cmd()
        .args(["connect", "--print"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No running instances"));
}

#[test]
fn test_unsupported_state_backend() {
    let env = Env::empty();
    env.cmd()
        .args(["config", "new", "work", "--state-backend", "gs://bucket/state"])
        .assert()
        .success();
    env.cmd()
        .args(["--json", "list"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("UNSUPPORTED_BACKEND"));
}

#[test]
fn test_hand_edited_provider_is_rejected() {
    let env = Env::empty();
    std::fs::write(
        env.dir.path().join("config.yaml"),
        "current_profile: g\nprofiles:\n  g:\n    provider: gcp\n",
    )
    .expect("write");
    env.cmd()
        .args(["--json", "list"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("CONFIG_ERROR"))
        .stdout(predicate::str::contains("Unsupported provider: gcp"));
}
