//! Integration tests for the `houghd` and `hough-worker` entry points.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn invalid_socket_flag_fails_start_up() {
    let mut command = cargo_bin_cmd!("houghd");
    command.args(["--socket", "invalid://socket"]);
    command
        .assert()
        .failure()
        .stderr(contains("houghd: failed to load configuration"));
}

#[test]
fn worker_announces_readiness_and_exits_on_eof() {
    let mut command = cargo_bin_cmd!("hough-worker");
    command.write_stdin(Vec::new());
    command
        .assert()
        .success()
        .stdout(contains(r#"{"type":"ready"}"#));
}

#[test]
fn worker_rejects_unknown_fault_directives() {
    let mut command = cargo_bin_cmd!("hough-worker");
    command.env("HOUGH_WORKER_FAULT_INJECTION", "explode:now");
    command
        .assert()
        .failure()
        .stderr(contains("unrecognised fault injection 'explode:now'"));
}
