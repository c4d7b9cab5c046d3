//! Shared helpers for CLI runtime tests.

use std::ffi::OsString;
use std::io::Cursor;
use std::process::ExitCode;

use tikapi_testkit::{DEVICE_HOST, FakeDevice};

/// Output captured from one CLI invocation.
#[derive(Debug)]
pub(super) struct Invocation {
    pub(super) exit: ExitCode,
    pub(super) stdout: String,
    pub(super) stderr: String,
}

/// Connection flags pointing at `device`.
pub(super) fn device_args(device: &FakeDevice) -> Vec<String> {
    vec![
        "tikapi".to_owned(),
        "--host".to_owned(),
        DEVICE_HOST.to_owned(),
        "--port".to_owned(),
        device.port().to_string(),
        "--connect-timeout".to_owned(),
        "2".to_owned(),
        "--command-timeout".to_owned(),
        "5".to_owned(),
    ]
}

/// Runs the CLI with `args` and `input` on stdin.
pub(super) fn invoke<I, S>(args: I, input: &str) -> Invocation
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut stdin = Cursor::new(input.as_bytes().to_vec());
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit = crate::run(
        args.into_iter().map(Into::into),
        &mut stdin,
        &mut stdout,
        &mut stderr,
    );
    Invocation {
        exit,
        stdout: String::from_utf8(stdout).expect("stdout is UTF-8"),
        stderr: String::from_utf8(stderr).expect("stderr is UTF-8"),
    }
}

/// Runs a subcommand against `device`.
pub(super) fn invoke_on(device: &FakeDevice, subcommand: &[&str], input: &str) -> Invocation {
    let mut args = device_args(device);
    args.extend(subcommand.iter().map(|word| (*word).to_owned()));
    invoke(args, input)
}
