//! The operations behind each subcommand.

pub(crate) mod exec;
pub(crate) mod fetch;
pub(crate) mod shell;

use tikapi::ops::Command;
use tikapi::{Argument, Connection, QUIT_COMMAND, Request, Sentence, SentenceKind};

use crate::errors::AppError;

/// Builds a command from its path and raw API words.
pub(crate) fn command_from_words<I, S>(path: &str, words: I) -> Command
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    words
        .into_iter()
        .fold(Command::new(path), |command, word| {
            command.arg(Argument::word(word))
        })
}

/// Sends `/quit` and returns the device's farewell message, if it gave one.
pub(crate) fn quit(connection: &mut Connection) -> Result<Option<String>, AppError> {
    let reply = connection.exchange(Request::plain(QUIT_COMMAND))?;
    let Some(farewell) = reply.first().filter(|sentence| sentence.is(SentenceKind::Fatal)) else {
        return Err(AppError::UnexpectedFarewell {
            reply: reply
                .first()
                .map(Sentence::to_string)
                .unwrap_or_default(),
        });
    };
    let message = farewell.message().map(str::to_owned);
    connection.close();
    Ok(message)
}
