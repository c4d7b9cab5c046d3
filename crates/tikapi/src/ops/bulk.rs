//! Run a batch of commands on a fresh connection.

use tracing::debug;

use super::fetch::FETCH_COMMAND;
use crate::CONNECTION_TARGET;
use crate::config::ConnectionConfig;
use crate::connection::{Connection, QUIT_COMMAND};
use crate::error::ApiError;
use crate::reply::Reply;
use crate::request::{Argument, Request, RequestState};

/// Reply limit applied when the caller gives none.
pub const MAX_REPLIES: usize = 1000;

/// A command path with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command path, e.g. `/interface/print`.
    pub path: String,
    /// Arguments in order.
    pub arguments: Vec<Argument>,
}

impl Command {
    /// A command without arguments.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            arguments: Vec::new(),
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, argument: impl Into<Argument>) -> Self {
        self.arguments.push(argument.into());
        self
    }
}

impl From<&str> for Command {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Resolves the caller's reply limit: `None` means [`MAX_REPLIES`] and zero
/// means unlimited.
#[must_use]
pub const fn reply_limit(limit: Option<usize>) -> Option<usize> {
    match limit {
        None => Some(MAX_REPLIES),
        Some(0) => None,
        Some(limit) => Some(limit),
    }
}

/// Logs in, runs every command concurrently and returns one reply per
/// command, in order.
///
/// Each command is canceled once it has produced `limit` sentences (see
/// [`reply_limit`]). `/tool/fetch` is exempt from the limit and is instead
/// canceled when it reports `status=finished`. The session ends with
/// `/quit`.
///
/// # Errors
///
/// Returns login failures and any error raised while the commands run.
pub fn run_commands(
    config: ConnectionConfig,
    commands: &[Command],
    limit: Option<usize>,
) -> Result<Vec<Reply>, ApiError> {
    let limit = reply_limit(limit);
    let mut connection = Connection::open(config)?;

    let mut tags = Vec::with_capacity(commands.len());
    for command in commands {
        let request = limited_request(command, limit).retain_reply();
        tags.push(connection.send(request)?);
    }
    connection.wait_for_all()?;

    let replies = tags
        .into_iter()
        .map(|tag| connection.take_reply(tag).unwrap_or_default())
        .collect();
    connection.exchange(Request::plain(QUIT_COMMAND))?;
    connection.close();
    Ok(replies)
}

/// Builds a per-sentence request for `command` that cancels itself after
/// `limit` sentences (`None` for no limit).
///
/// `/tool/fetch` ignores the limit and cancels once it reports
/// `status=finished`.
#[must_use]
pub fn limited_request(command: &Command, limit: Option<usize>) -> Request {
    let is_fetch = command.path == FETCH_COMMAND;
    let mut received = 0_usize;
    Request::new(command.path.as_str(), command.arguments.iter().cloned(), false)
        .with_callback(move |context, sentence| {
            received += 1;
            if context.state() != RequestState::Sent {
                return Ok(());
            }
            let cancel = if is_fetch {
                sentence.value("status") == Some("finished")
            } else {
                limit.is_some_and(|limit| received >= limit)
            };
            if cancel {
                debug!(
                    target: CONNECTION_TARGET,
                    tag = %context.tag(),
                    command = context.command(),
                    received,
                    "canceling at reply limit"
                );
                context.cancel()?;
            }
            Ok(())
        })
}
