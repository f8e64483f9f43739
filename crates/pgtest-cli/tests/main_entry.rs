//! Integration tests for the `pgtest` binary entry point.
//!
//! Verifies help output and how a failed start is reported.

#![expect(
    clippy::expect_used,
    reason = "test code uses expect for clarity and assertions"
)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

#[test]
fn help_lists_the_flags() {
    let mut command = cargo_bin_cmd!("pgtest");
    command.arg("--help");
    command
        .assert()
        .success()
        .stdout(contains("--data-dir"))
        .stdout(contains("--persistent"))
        .stdout(contains("SERVER_ARGS"));
}

#[test]
fn unknown_log_format_exits_with_failure() {
    let mut command = cargo_bin_cmd!("pgtest");
    command.args(["--log-format", "pretty"]);
    command.assert().failure().stderr(contains("--log-format"));
}

#[test]
fn failed_start_exits_with_failure() {
    let root = TempDir::new().expect("create instance root");
    let mut command = cargo_bin_cmd!("pgtest");
    command
        .arg("--bin-dir")
        .arg(root.path().join("missing-bin"))
        .arg("--data-dir")
        .arg(root.path())
        .env("PGTEST_LOG_FILTER", "off");
    command
        .assert()
        .failure()
        .stdout("")
        .stderr(contains("pgtest: "));
}
