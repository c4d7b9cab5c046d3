//! Integration tests for the `tikapi` binary entry point.
//!
//! Verifies help output and user-facing error handling when the device
//! cannot be reached.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn help_lists_subcommands() {
    let mut command = cargo_bin_cmd!("tikapi");
    command.arg("--help");
    command
        .assert()
        .success()
        .stdout(contains("exec"))
        .stdout(contains("fetch"))
        .stdout(contains("shell"));
}

#[test]
fn missing_host_is_a_usage_error() {
    let mut command = cargo_bin_cmd!("tikapi");
    command.env_remove("TIKAPI_HOST").arg("shell");
    command.assert().code(2).stderr(contains("--host"));
}

#[test]
fn unreachable_devices_fail_cleanly() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let mut command = cargo_bin_cmd!("tikapi");
    command.args([
        "--host",
        "127.0.0.1",
        "--port",
        &port.to_string(),
        "exec",
        "/system/identity/print",
    ]);
    command
        .assert()
        .failure()
        .stderr(contains("failed to connect to 127.0.0.1:"));
}
