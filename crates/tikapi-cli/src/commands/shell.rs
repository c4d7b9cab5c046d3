//! Interactive command loop.
//!
//! Each input line is a command path followed by API words, optionally
//! prefixed with `N:` to cancel the command after `N` reply sentences.
//! Sentences are printed as they arrive. A session the device dropped is
//! logged in again before the next prompt.

use std::io::{BufRead, Write};
use std::sync::mpsc;

use tikapi::ops::{Command, limited_request};
use tikapi::{Connection, ConnectionConfig, QUIT_COMMAND};
use tracing::info;

use super::{command_from_words, quit};
use crate::CLI_TARGET;
use crate::errors::AppError;
use crate::output::{Renderer, line};

const PROMPT: &str = "Command (/quit to end): ";

/// One parsed input line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ShellInput {
    Blank,
    Quit,
    Invalid(String),
    Run {
        command: Command,
        limit: Option<usize>,
    },
}

pub(crate) fn parse_line(input: &str) -> ShellInput {
    let (limit, rest) = split_limit(input.trim());
    let mut tokens = rest.split_whitespace();
    let Some(path) = tokens.next() else {
        return ShellInput::Blank;
    };
    if path == QUIT_COMMAND {
        return ShellInput::Quit;
    }
    if !is_command_path(path) {
        return ShellInput::Invalid(path.to_owned());
    }
    ShellInput::Run {
        command: command_from_words(path, tokens),
        limit,
    }
}

/// Splits a leading `N:` reply limit. Zero means no limit.
fn split_limit(input: &str) -> (Option<usize>, &str) {
    input
        .split_once(':')
        .filter(|(count, _)| !count.is_empty() && count.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|(count, rest)| {
            count
                .parse::<usize>()
                .ok()
                .map(|count| ((count > 0).then_some(count), rest))
        })
        .unwrap_or((None, input))
}

/// `/segment/segment...` with ASCII letters, digits and dashes.
fn is_command_path(path: &str) -> bool {
    path.strip_prefix('/').is_some_and(|rest| {
        rest.split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-')
        })
    })
}

/// Runs the loop until `/quit` or end of input.
pub(crate) fn run<R: BufRead, W: Write>(
    config: ConnectionConfig,
    renderer: Renderer,
    stdin: &mut R,
    stdout: &mut W,
) -> Result<(), AppError> {
    let mut connection = Connection::open(config).map_err(AppError::Login)?;
    let mut input = String::new();
    loop {
        write!(stdout, "\n{PROMPT}")
            .and_then(|()| stdout.flush())
            .map_err(AppError::WriteOutput)?;
        input.clear();
        if stdin.read_line(&mut input).map_err(AppError::ReadInput)? == 0 {
            line(stdout, "")?;
            break;
        }
        match parse_line(&input) {
            ShellInput::Blank => {}
            ShellInput::Quit => break,
            ShellInput::Invalid(path) => line(stdout, &format!("=== INVALID COMMAND: {path}"))?,
            ShellInput::Run { command, limit } => {
                line(stdout, &format!("=== COMMAND: {}", command.path))?;
                match stream(&mut connection, &command, limit, renderer, stdout) {
                    Ok(()) => {}
                    Err(AppError::Device(error)) => line(stdout, &format!("=== ERROR: {error}"))?,
                    Err(other) => return Err(other),
                }
                if !connection.is_connected() {
                    info!(target: CLI_TARGET, "session dropped; logging in again");
                    connection.login().map_err(AppError::Login)?;
                }
            }
        }
    }

    let farewell = quit(&mut connection)?;
    let notice = farewell.map_or_else(
        || "=== SESSION TERMINATED ===".to_owned(),
        |message| format!("=== SESSION TERMINATED: '{message}' ==="),
    );
    line(stdout, &notice)?;
    line(stdout, "=== Disconnected ===")
}

/// Sends `command` and prints its sentences until it completes.
fn stream<W: Write>(
    connection: &mut Connection,
    command: &Command,
    limit: Option<usize>,
    renderer: Renderer,
    stdout: &mut W,
) -> Result<(), AppError> {
    let (sender, receiver) = mpsc::channel();
    let request = limited_request(command, limit).with_callback(move |_, sentence| {
        sender.send(sentence.clone())?;
        Ok(())
    });
    let tag = connection.send(request)?;
    loop {
        let pumped = connection
            .request_state(tag)
            .is_some()
            .then(|| connection.pump());
        for sentence in receiver.try_iter() {
            renderer.sentence(stdout, &sentence)?;
        }
        match pumped {
            None => return Ok(()),
            Some(result) => result?,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tikapi::Argument;

    use super::*;

    #[rstest]
    #[case("", ShellInput::Blank)]
    #[case("   \n", ShellInput::Blank)]
    #[case("/quit\n", ShellInput::Quit)]
    #[case("interface print", ShellInput::Invalid("interface".to_owned()))]
    #[case("/ip//address", ShellInput::Invalid("/ip//address".to_owned()))]
    #[case("/ip/address/print?", ShellInput::Invalid("/ip/address/print?".to_owned()))]
    fn classifies_lines(#[case] input: &str, #[case] expected: ShellInput) {
        assert_eq!(parse_line(input), expected);
    }

    #[rstest]
    #[case("/interface/print", None)]
    #[case("5:/log/print =follow=", Some(5))]
    #[case("0:/log/print", None)]
    fn parses_commands_and_limits(#[case] input: &str, #[case] limit: Option<usize>) {
        let ShellInput::Run {
            command,
            limit: parsed,
        } = parse_line(input)
        else {
            panic!("expected a command for {input}");
        };

        assert!(command.path.starts_with('/'));
        assert_eq!(parsed, limit);
    }

    #[rstest]
    fn keeps_words_verbatim() {
        let ShellInput::Run { command, .. } =
            parse_line("/ip/address/add =address=192.0.2.1/24 =interface=ether1")
        else {
            panic!("expected a command");
        };

        assert_eq!(
            command.arguments,
            vec![
                Argument::word("=address=192.0.2.1/24"),
                Argument::word("=interface=ether1")
            ]
        );
    }

    #[rstest]
    fn colons_inside_words_are_not_limits() {
        let ShellInput::Run { command, limit } =
            parse_line("/ip/service/set =address=192.0.2.1:80")
        else {
            panic!("expected a command");
        };

        assert_eq!(limit, None);
        assert_eq!(command.arguments.len(), 1);
    }
}
