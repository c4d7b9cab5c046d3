//! One-shot command execution.

use std::io::Write;

use tikapi::ConnectionConfig;
use tikapi::ops::{Command, run_commands};
use tracing::debug;

use crate::CLI_TARGET;
use crate::errors::AppError;
use crate::output::Renderer;

/// Runs `command` on a fresh session and prints every reply sentence.
///
/// `limit` follows [`tikapi::ops::reply_limit`].
pub(crate) fn run<W: Write>(
    config: ConnectionConfig,
    command: &Command,
    limit: Option<usize>,
    renderer: Renderer,
    stdout: &mut W,
) -> Result<(), AppError> {
    debug!(
        target: CLI_TARGET,
        endpoint = %config.endpoint(),
        command = %command.path,
        "executing command"
    );
    let replies = run_commands(config, std::slice::from_ref(command), limit)?;
    for sentence in replies.iter().flat_map(|reply| reply.iter()) {
        renderer.sentence(stdout, sentence)?;
    }
    Ok(())
}
