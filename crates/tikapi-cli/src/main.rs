//! CLI entrypoint for the `tikapi` RouterOS client.
//!
//! The binary delegates to [`tikapi_cli::run`], which parses arguments,
//! installs telemetry and runs the selected command against the device.

use std::io::{self, StderrLock, StdinLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdin: StdinLock<'static> = io::stdin().lock();
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    tikapi_cli::run(std::env::args_os(), &mut stdin, &mut stdout, &mut stderr)
}
