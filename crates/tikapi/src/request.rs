//! Outgoing requests and their lifecycle.

use std::fmt;

use tikapi_wire::{EncodingError, Sentence, SentenceKind, TAG_KEY, WIRE_TARGET, encode_sentence};
use tracing::trace;

use crate::context::ReplyContext;
use crate::error::{CallbackError, ProtocolError};
use crate::reply::Reply;
use crate::tag::Tag;

/// Callback invoked with each delivered sentence.
pub type ReplyCallback =
    Box<dyn FnMut(&mut ReplyContext<'_>, &Sentence) -> Result<(), CallbackError> + Send>;

/// One request argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    /// A token sent verbatim, e.g. `=name=ether1`, `?type=ether` or
    /// `.proplist=name`.
    Word(String),
    /// An attribute. The key gains a leading `=` unless it already starts
    /// with `.`, `=` or `?`.
    Pair {
        /// Attribute name.
        key: String,
        /// Attribute value.
        value: String,
    },
}

impl Argument {
    /// Creates a verbatim token.
    #[must_use]
    pub fn word(token: impl Into<String>) -> Self {
        Self::Word(token.into())
    }

    /// Creates an attribute pair.
    #[must_use]
    pub fn pair(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Pair {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The token as it goes on the wire.
    #[must_use]
    pub fn to_token(&self) -> String {
        match self {
            Self::Word(token) => token.clone(),
            Self::Pair { key, value } if key.starts_with(['.', '=', '?']) => {
                format!("{key}={value}")
            }
            Self::Pair { key, value } => format!("={key}={value}"),
        }
    }
}

impl From<&str> for Argument {
    fn from(token: &str) -> Self {
        Self::word(token)
    }
}

impl From<String> for Argument {
    fn from(token: String) -> Self {
        Self::Word(token)
    }
}

impl<K, V> From<(K, V)> for Argument
where
    K: Into<String>,
    V: Into<String>,
{
    fn from((key, value): (K, V)) -> Self {
        Self::pair(key, value)
    }
}

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Built but not transmitted.
    New,
    /// Transmitted and waiting for replies.
    Sent,
    /// A `/cancel` for it has been issued.
    Canceled,
    /// `!done` (or a fatal) has been received.
    Complete,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Sent => "sent",
            Self::Canceled => "canceled",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// A command with its arguments, reply and callbacks.
pub struct Request {
    command: String,
    arguments: Vec<String>,
    await_completion: bool,
    retain_reply: bool,
    tag: Option<Tag>,
    state: RequestState,
    reply: Reply,
    callbacks: Vec<ReplyCallback>,
}

impl Request {
    /// Creates a request in state [`RequestState::New`].
    ///
    /// With `await_completion` the callbacks run once, on `!done`; without
    /// it they run for every sentence. Any `.tag=` argument is dropped since
    /// the connection assigns tags.
    #[must_use]
    pub fn new<I, A>(command: impl Into<String>, arguments: I, await_completion: bool) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Argument>,
    {
        let mut request = Self::plain(command);
        request.await_completion = await_completion;
        for argument in arguments {
            request = request.arg(argument);
        }
        request
    }

    /// Creates an argument-less request that awaits completion.
    #[must_use]
    pub fn plain(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            arguments: Vec::new(),
            await_completion: true,
            retain_reply: false,
            tag: None,
            state: RequestState::New,
            reply: Reply::default(),
            callbacks: Vec::new(),
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, argument: impl Into<Argument>) -> Self {
        let token = argument.into().to_token();
        if !token.starts_with(".tag=") {
            self.arguments.push(token);
        }
        self
    }

    /// Registers a callback. Callbacks run in registration order.
    #[must_use]
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut ReplyContext<'_>, &Sentence) -> Result<(), CallbackError> + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }

    /// Keeps the reply after completion for
    /// [`Connection::wait_for`](crate::Connection::wait_for).
    #[must_use]
    pub const fn retain_reply(mut self) -> Self {
        self.retain_reply = true;
        self
    }

    /// The command path.
    #[must_use]
    pub const fn command(&self) -> &str {
        self.command.as_str()
    }

    /// Argument tokens in wire form.
    #[must_use]
    pub const fn arguments(&self) -> &[String] {
        self.arguments.as_slice()
    }

    /// Whether callbacks wait for `!done`.
    #[must_use]
    pub const fn awaits_completion(&self) -> bool {
        self.await_completion
    }

    /// Whether the reply is kept after completion.
    #[must_use]
    pub const fn retains_reply(&self) -> bool {
        self.retain_reply
    }

    /// The assigned tag, once sent.
    #[must_use]
    pub const fn tag(&self) -> Option<Tag> {
        self.tag
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RequestState {
        self.state
    }

    /// Sentences received so far.
    #[must_use]
    pub const fn reply(&self) -> &Reply {
        &self.reply
    }

    /// Whether the request has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == RequestState::Complete
    }

    /// Assigns `tag` and moves to [`RequestState::Sent`].
    pub(crate) fn mark_sent(&mut self, tag: Tag) -> Result<(), ProtocolError> {
        if let Some(existing) = self.tag {
            return Err(ProtocolError::AlreadySent { tag: existing });
        }
        if self.state != RequestState::New {
            return Err(ProtocolError::InvalidState {
                operation: "send",
                state: self.state,
            });
        }
        self.tag = Some(tag);
        self.state = RequestState::Sent;
        Ok(())
    }

    /// Moves a sent request to [`RequestState::Canceled`].
    pub(crate) fn mark_canceled(&mut self) -> Result<(), ProtocolError> {
        if self.state != RequestState::Sent {
            return Err(ProtocolError::InvalidState {
                operation: "cancel",
                state: self.state,
            });
        }
        self.state = RequestState::Canceled;
        Ok(())
    }

    /// Moves to [`RequestState::Complete`].
    pub(crate) fn mark_complete(&mut self) -> Result<(), ProtocolError> {
        if self.is_complete() {
            return Err(self.after_completion());
        }
        self.state = RequestState::Complete;
        Ok(())
    }

    /// Appends a received sentence and reports whether callbacks fire.
    pub(crate) fn deliver(&mut self, sentence: Sentence) -> Result<bool, ProtocolError> {
        if self.is_complete() {
            return Err(self.after_completion());
        }
        let terminal = sentence.is(SentenceKind::Done);
        self.reply.push(sentence);
        if terminal {
            self.mark_complete()?;
        }
        Ok(terminal || !self.await_completion)
    }

    /// Completes the request with a fatal sentence. Callbacks always fire.
    pub(crate) fn deliver_fatal(&mut self, sentence: Sentence) {
        self.reply.push(sentence);
        self.state = RequestState::Complete;
    }

    /// Encodes the request as one sentence carrying `tag`.
    pub(crate) fn encode(&self, tag: Tag) -> Result<Vec<u8>, EncodingError> {
        let tag_word = format!("{TAG_KEY}={tag}");
        let words = std::iter::once(self.command.as_str())
            .chain(self.arguments.iter().map(String::as_str))
            .chain(std::iter::once(tag_word.as_str()));
        for word in words.clone() {
            trace!(target: WIRE_TARGET, %tag, word, "sending word");
        }
        encode_sentence(words)
    }

    pub(crate) fn take_callbacks(&mut self) -> Vec<ReplyCallback> {
        std::mem::take(&mut self.callbacks)
    }

    pub(crate) fn restore_callbacks(&mut self, callbacks: Vec<ReplyCallback>) {
        self.callbacks = callbacks;
    }

    pub(crate) fn into_reply(self) -> Reply {
        self.reply
    }

    fn after_completion(&self) -> ProtocolError {
        ProtocolError::AfterCompletion {
            tag: self.tag.unwrap_or(Tag::new(0)),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.command)
            .field("arguments", &self.arguments)
            .field("await_completion", &self.await_completion)
            .field("retain_reply", &self.retain_reply)
            .field("tag", &self.tag)
            .field("state", &self.state)
            .field("replies", &self.reply.len())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}
