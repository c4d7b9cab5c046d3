//! Command-line runtime for the `tikapi` RouterOS client.
//!
//! [`run`] parses arguments, installs telemetry and runs one of three
//! operations against a device: a one-shot command (`exec`), device-side
//! downloads (`fetch`) or an interactive shell (`shell`). Streams are
//! passed in so tests can drive the runtime with in-memory buffers.

use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use clap::error::ErrorKind;

mod cli;
mod commands;
mod errors;
mod output;
mod telemetry;

#[cfg(test)]
mod tests;

use cli::{Cli, CliCommand};
pub use cli::OutputFormat;
use errors::AppError;
use output::Renderer;
pub use telemetry::{LogFormat, TelemetryError, initialise};

/// Log target for CLI events.
pub const CLI_TARGET: &str = "tikapi::cli";

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, R, W, E>(args: I, stdin: &mut R, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => return report_usage(&error, stdout, stderr),
    };
    match execute(cli, stdin, stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(stderr, "tikapi: {error}");
            ExitCode::FAILURE
        }
    }
}

fn report_usage<W: Write, E: Write>(error: &clap::Error, stdout: &mut W, stderr: &mut E) -> ExitCode {
    if matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
        let _ = write!(stdout, "{error}");
        return ExitCode::SUCCESS;
    }
    let _ = write!(stderr, "{error}");
    ExitCode::from(2)
}

fn execute<R: BufRead, W: Write>(cli: Cli, stdin: &mut R, stdout: &mut W) -> Result<(), AppError> {
    telemetry::initialise(&cli.log_filter, cli.log_format)?;
    let config = cli.connection.to_config();
    let renderer = Renderer::new(cli.output);
    match cli.command {
        CliCommand::Exec {
            limit,
            command,
            words,
        } => {
            let command = commands::command_from_words(&command, words);
            commands::exec::run(config, &command, limit, renderer, stdout)
        }
        CliCommand::Fetch {
            stall_timeout,
            targets,
        } => commands::fetch::run(
            config,
            &targets,
            Duration::from_secs(stall_timeout),
            renderer,
            stdout,
        ),
        CliCommand::Shell => commands::shell::run(config, renderer, stdin, stdout),
    }
}
