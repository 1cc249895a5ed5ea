//! Tests for the `poolwatch` binary.

use std::io::Write;

use assert_cmd::Command;

#[test]
fn help_lists_subcommands() {
    let output = Command::cargo_bin("poolwatch")
        .expect("binary exists")
        .arg("--help")
        .output()
        .expect("run --help");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("start"));
    assert!(stdout.contains("check"));
}

#[test]
fn check_scans_a_log_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("access.log");
    let mut f = std::fs::File::create(&path).expect("create log");
    writeln!(f, r#"{{"pool":"blue","upstream_status":"200","status":"200"}}"#).expect("write");
    writeln!(f, r#"{{"pool":"green","upstream_status":"200","status":"200"}}"#).expect("write");

    Command::cargo_bin("poolwatch")
        .expect("binary exists")
        .current_dir(dir.path())
        .env_remove("SLACK_WEBHOOK_URL")
        .arg("check")
        .arg(&path)
        .assert()
        .success();
}

#[test]
fn check_missing_file_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    Command::cargo_bin("poolwatch")
        .expect("binary exists")
        .current_dir(dir.path())
        .arg("check")
        .arg(dir.path().join("missing.log"))
        .assert()
        .failure();
}

#[test]
fn invalid_env_value_fails_at_startup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("access.log");
    std::fs::write(&path, "").expect("create log");

    Command::cargo_bin("poolwatch")
        .expect("binary exists")
        .current_dir(dir.path())
        .env("WINDOW_SIZE", "lots")
        .arg("check")
        .arg(&path)
        .assert()
        .failure();
}
