//! Reading sentences and delivering them to their requests.

use std::io::{ErrorKind, Read};

use tikapi_wire::{Sentence, SentenceKind};
use tracing::{debug, trace, warn};

use super::{Connection, QUIT_COMMAND};
use crate::CONNECTION_TARGET;
use crate::context::run_callbacks;
use crate::error::{ApiError, ConnectionError, ProtocolError};
use crate::tag::Tag;

/// Bytes requested from the socket per read.
const READ_CHUNK: usize = 8192;

/// Message of the fatal sentence synthesised when the peer closes the socket.
pub(crate) const PEER_CLOSED_MESSAGE: &str = "connection closed by peer";

impl Connection {
    /// Blocks until one sentence has been read and applied, then applies
    /// every further complete sentence already buffered.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::NothingOutstanding`] when no request is waiting.
    /// - [`ApiError::Timeout`] when nothing arrives within the command
    ///   timeout; the socket stays open.
    /// - [`ApiError::Fatal`] after a `!fatal` has been delivered to every
    ///   outstanding request, unless one of them was `/quit`. End of stream
    ///   and socket errors are delivered the same way.
    /// - [`ProtocolError`] for untagged sentences, unknown tags and
    ///   sentences after completion.
    /// - [`ApiError::Callback`] when a callback fails.
    pub fn pump(&mut self) -> Result<(), ApiError> {
        if self.outstanding.is_empty() {
            return Err(ProtocolError::NothingOutstanding.into());
        }
        let sentence = self.read_sentence()?;
        self.apply(sentence)?;
        while let Some(sentence) = self.assembler.next_sentence()? {
            self.apply(sentence)?;
        }
        Ok(())
    }

    /// Returns the next complete sentence, reading from the socket as needed.
    fn read_sentence(&mut self) -> Result<Sentence, ApiError> {
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            if let Some(sentence) = self.assembler.next_sentence()? {
                return Ok(sentence);
            }
            let Some(stream) = self.stream.as_mut() else {
                return Err(ConnectionError::NotConnected.into());
            };
            match stream.read(&mut chunk) {
                Ok(0) => {
                    debug!(target: CONNECTION_TARGET, "peer closed the connection");
                    return Ok(disconnected(PEER_CLOSED_MESSAGE));
                }
                Ok(read) => {
                    trace!(target: CONNECTION_TARGET, bytes = read, "received bytes");
                    self.assembler.extend(chunk.get(..read).unwrap_or_default());
                }
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) if matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    let pending = self.pending_requests();
                    warn!(
                        target: CONNECTION_TARGET,
                        pending = %pending,
                        "command timeout"
                    );
                    return Err(ApiError::Timeout {
                        timeout_secs: self.config.command_timeout.as_secs(),
                        pending,
                    });
                }
                Err(error) => {
                    warn!(target: CONNECTION_TARGET, %error, "socket read failed");
                    return Ok(disconnected(&error.to_string()));
                }
            }
        }
    }

    /// Routes one sentence to its request.
    fn apply(&mut self, sentence: Sentence) -> Result<(), ApiError> {
        if sentence.is(SentenceKind::Fatal) {
            return self.sweep(&sentence);
        }
        let Some(raw_tag) = sentence.tag() else {
            return Err(ProtocolError::Untagged {
                sentence: sentence.to_string(),
            }
            .into());
        };
        let Some((tag, mut request)) = raw_tag
            .parse::<Tag>()
            .ok()
            .and_then(|tag| self.outstanding.remove_entry(&tag))
        else {
            warn!(target: CONNECTION_TARGET, tag = raw_tag, "sentence for unknown tag");
            return Err(ProtocolError::UnknownTag {
                tag: raw_tag.to_owned(),
            }
            .into());
        };

        let fire = match request.deliver(sentence.clone()) {
            Ok(fire) => fire,
            Err(error) => {
                self.outstanding.insert(tag, request);
                return Err(error.into());
            }
        };
        trace!(
            target: CONNECTION_TARGET,
            %tag,
            kind = ?sentence.kind(),
            fire,
            "delivered sentence"
        );

        let mut queued = Vec::new();
        let outcome = if fire {
            run_callbacks(tag, &mut request, &mut self.tags, &mut queued, &sentence)
        } else {
            Ok(())
        };

        if request.is_complete() {
            debug!(
                target: CONNECTION_TARGET,
                %tag,
                command = request.command(),
                sentences = request.reply().len(),
                "request complete"
            );
            if request.retains_reply() {
                self.finished.insert(tag, request.into_reply());
            }
        } else {
            self.outstanding.insert(tag, request);
        }

        let transmitted = self.transmit_queued(queued);
        outcome.and(transmitted)
    }

    /// Terminates every outstanding request with `fatal`.
    pub(super) fn sweep(&mut self, fatal: &Sentence) -> Result<(), ApiError> {
        let message = fatal.message().unwrap_or("no message").to_owned();
        warn!(
            target: CONNECTION_TARGET,
            %message,
            outstanding = self.outstanding.len(),
            "fatal sentence received"
        );
        self.teardown();

        let drained = std::mem::take(&mut self.outstanding);
        let mut quit = false;
        let mut first_error = None;
        for (tag, mut request) in drained {
            quit |= request.command() == QUIT_COMMAND;
            request.deliver_fatal(fatal.clone());
            let mut discarded = Vec::new();
            let outcome = run_callbacks(tag, &mut request, &mut self.tags, &mut discarded, fatal);
            if let Err(error) = outcome {
                first_error.get_or_insert(error);
            }
            if !discarded.is_empty() {
                debug!(
                    target: CONNECTION_TARGET,
                    %tag,
                    dropped = discarded.len(),
                    "dropped requests queued after fatal"
                );
            }
            if request.retains_reply() {
                self.finished.insert(tag, request.into_reply());
            }
        }

        let trailing = self.assembler.buffered();
        self.assembler.clear();
        if trailing > 0 {
            return Err(ProtocolError::TrailingBytes { count: trailing }.into());
        }
        if let Some(error) = first_error {
            return Err(error);
        }
        if quit {
            debug!(target: CONNECTION_TARGET, "session ended by quit");
            return Ok(());
        }
        Err(ApiError::Fatal { message })
    }
}

/// A local `!fatal` standing in for a connection the device never ended.
pub(super) fn disconnected(message: &str) -> Sentence {
    [("!fatal", None), ("message", Some(message))]
    .into_iter()
    .collect()
}
