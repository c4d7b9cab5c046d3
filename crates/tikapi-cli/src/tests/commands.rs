//! End-to-end runs of each subcommand.

use std::process::ExitCode;

use rstest::rstest;
use tikapi::CANCEL_COMMAND;
use tikapi_testkit::{DEFAULT_CHALLENGE, DeviceSession, FakeDevice, tag_of};

use super::support::{invoke, invoke_on};

fn serve_cancel(session: &mut DeviceSession, target: &str) -> anyhow::Result<()> {
    let cancel = session.expect_command(CANCEL_COMMAND)?;
    anyhow::ensure!(cancel.value("tag") == Some(target), "cancel names {target}");
    session.send_trap(target, "interrupted")?;
    session.send_done(target)?;
    session.send_done(&tag_of(&cancel)?)
}

#[rstest]
fn exec_prints_every_sentence() {
    let device = FakeDevice::spawn(|session| {
        session.serve_handshake()?;
        let request = session.expect_command("/interface/print")?;
        anyhow::ensure!(request.value("?type") == Some("ether"), "query word");
        let tag = tag_of(&request)?;
        session.send_re(&tag, &["name=ether1", "mtu=1500"])?;
        session.send_done(&tag)?;
        session.serve_quit()
    })
    .expect("spawn device");

    let run = invoke_on(&device, &["exec", "/interface/print", "?type=ether"], "");

    assert_eq!(run.exit, ExitCode::SUCCESS, "stderr: {}", run.stderr);
    let lines: Vec<&str> = run.stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.first().is_some_and(|l| l.starts_with("!re name=ether1 mtu=1500")));
    assert!(lines.last().is_some_and(|l| l.starts_with("!done")));
    device.finish().expect("device script");
}

#[rstest]
fn exec_renders_json_lines() {
    let device = FakeDevice::spawn(|session| {
        session.serve_handshake()?;
        let tag = tag_of(&session.expect_command("/system/identity/print")?)?;
        session.send_re(&tag, &["name=edge"])?;
        session.send_done(&tag)?;
        session.serve_quit()
    })
    .expect("spawn device");

    let run = invoke_on(
        &device,
        &["--output", "json", "exec", "/system/identity/print"],
        "",
    );

    assert_eq!(run.exit, ExitCode::SUCCESS, "stderr: {}", run.stderr);
    let first = run.stdout.lines().next().expect("a line");
    let row: serde_json::Value = serde_json::from_str(first).expect("json");
    assert_eq!(row.get("name").and_then(|v| v.as_str()), Some("edge"));
    device.finish().expect("device script");
}

#[rstest]
fn exec_cancels_at_the_limit() {
    let device = FakeDevice::spawn(|session| {
        session.serve_handshake()?;
        let tag = tag_of(&session.expect_command("/log/print")?)?;
        session.send_re(&tag, &["message=one"])?;
        serve_cancel(session, &tag)?;
        session.serve_quit()
    })
    .expect("spawn device");

    let run = invoke_on(&device, &["exec", "--limit", "1", "/log/print", "=follow="], "");

    assert_eq!(run.exit, ExitCode::SUCCESS, "stderr: {}", run.stderr);
    assert!(run.stdout.contains("=== TRAP: 'interrupted'"));
    device.finish().expect("device script");
}

#[rstest]
fn login_failures_exit_with_failure() {
    let device = FakeDevice::spawn(|session| {
        let accepted = session.serve_challenge_login("admin", "secret", &DEFAULT_CHALLENGE)?;
        anyhow::ensure!(!accepted, "wrong password accepted");
        session.expect_eof()
    })
    .expect("spawn device");

    let run = invoke_on(
        &device,
        &["--password", "guess", "exec", "/system/identity/print"],
        "",
    );

    assert_eq!(run.exit, ExitCode::FAILURE);
    assert!(run.stderr.contains("authentication failed"), "stderr: {}", run.stderr);
    device.finish().expect("device script");
}

#[rstest]
fn shell_runs_commands_until_quit() {
    let device = FakeDevice::spawn(|session| {
        session.serve_handshake()?;
        let identity = tag_of(&session.expect_command("/system/identity/print")?)?;
        session.send_re(&identity, &["name=MikroTik"])?;
        session.send_done(&identity)?;
        let log = tag_of(&session.expect_command("/log/print")?)?;
        session.send_re(&log, &["message=one"])?;
        session.send_re(&log, &["message=two"])?;
        serve_cancel(session, &log)?;
        session.serve_quit()
    })
    .expect("spawn device");
    let input = "/system/identity/print\n\n2:/log/print =follow=\nprint\n/quit\n";

    let run = invoke_on(&device, &["shell"], input);

    assert_eq!(run.exit, ExitCode::SUCCESS, "stderr: {}", run.stderr);
    for expected in [
        "=== COMMAND: /system/identity/print",
        "!re name=MikroTik",
        "!re message=two",
        "=== TRAP: 'interrupted'",
        "=== INVALID COMMAND: print",
        "=== SESSION TERMINATED: 'session terminated on request' ===",
        "=== Disconnected ===",
    ] {
        assert!(run.stdout.contains(expected), "missing {expected:?} in {}", run.stdout);
    }
    device.finish().expect("device script");
}

#[rstest]
fn shell_logs_in_again_after_a_drop() {
    let device = FakeDevice::spawn_many(2, |session, index| {
        session.serve_handshake()?;
        if index == 0 {
            session.expect_command("/ping")?;
            return session.close();
        }
        session.serve_quit()
    })
    .expect("spawn device");

    let run = invoke_on(&device, &["shell"], "/ping =address=192.0.2.1\n/quit\n");

    assert_eq!(run.exit, ExitCode::SUCCESS, "stderr: {}", run.stderr);
    assert!(run.stdout.contains("=== ERROR: "), "{}", run.stdout);
    assert!(run.stdout.contains("connection closed by peer"));
    assert!(run.stdout.contains("=== Disconnected ==="));
    device.finish().expect("device script");
}

#[rstest]
fn end_of_input_quits_the_shell() {
    let device = FakeDevice::spawn(|session| {
        session.serve_handshake()?;
        session.serve_quit()
    })
    .expect("spawn device");

    let run = invoke_on(&device, &["shell"], "");

    assert_eq!(run.exit, ExitCode::SUCCESS, "stderr: {}", run.stderr);
    assert!(run.stdout.contains("=== SESSION TERMINATED"));
    device.finish().expect("device script");
}

#[rstest]
fn fetch_downloads_new_files_and_lists_the_store() {
    let device = FakeDevice::spawn(|session| {
        session.serve_handshake()?;
        let listing = tag_of(&session.expect_command("/file/getall")?)?;
        session.send_re(&listing, &["name=old.rsc", "size=12", "creation-time=jan/02/2024 10:00:00"])?;
        session.send_done(&listing)?;

        let fetch = session.expect_command("/tool/fetch")?;
        anyhow::ensure!(fetch.value("dst-path") == Some("new.rsc"), "destination");
        let tag = tag_of(&fetch)?;
        session.send_re(&tag, &["status=connecting"])?;
        session.send_re(&tag, &["status=downloading", "total=10KiB", "downloaded=5KiB"])?;
        session.send_re(&tag, &["status=finished", "total=10KiB", "downloaded=10KiB"])?;
        serve_cancel(session, &tag)?;

        let listing = tag_of(&session.expect_command("/file/getall")?)?;
        session.send_re(&listing, &["name=old.rsc", "size=12", "creation-time=jan/02/2024 10:00:00"])?;
        session.send_re(&listing, &["name=new.rsc", "size=10240", "creation-time=jan/03/2024 09:30:00"])?;
        session.send_done(&listing)?;
        session.serve_quit()
    })
    .expect("spawn device");

    let run = invoke_on(
        &device,
        &[
            "fetch",
            "http://192.0.2.7/scripts/setup.rsc",
            "new.rsc",
            "http://192.0.2.7/old.rsc",
        ],
        "",
    );

    assert_eq!(run.exit, ExitCode::SUCCESS, "stderr: {}", run.stderr);
    for expected in [
        ">>> ERROR: There is a file named 'old.rsc' already on the device.",
        ">>> OK: Fetching file 'new.rsc' from URL 'http://192.0.2.7/scripts/setup.rsc'...",
        ">>> OK: Downloaded 5 KiB of 10 KiB of 'new.rsc' (50%)",
        ">>> OK: File 'new.rsc' download finished",
        "SIZE        CREATED               FILENAME",
        "10240       jan/03/2024 09:30:00  new.rsc",
    ] {
        assert!(run.stdout.contains(expected), "missing {expected:?} in {}", run.stdout);
    }
    device.finish().expect("device script");
}

#[rstest]
fn help_is_written_to_stdout() {
    let run = invoke(["tikapi", "--help"], "");

    assert_eq!(run.exit, ExitCode::SUCCESS);
    assert!(run.stdout.contains("Usage: tikapi"));
    assert!(run.stderr.is_empty());
}

#[rstest]
fn usage_errors_exit_with_code_two() {
    let run = invoke(["tikapi", "--host", "192.0.2.1", "reboot"], "");

    assert_eq!(run.exit, ExitCode::from(2));
    assert!(run.stderr.contains("reboot"));
}
