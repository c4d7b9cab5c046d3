//! The device connection: dispatch, correlation and lifecycle.

mod login;
pub(crate) mod pump;

use std::collections::BTreeMap;
use std::io::Write;

use tikapi_wire::{Sentence, SentenceAssembler};
use tracing::{debug, info, warn};

use crate::CONNECTION_TARGET;
use crate::config::ConnectionConfig;
use crate::context::{ReplyContext, cancel_request};
use crate::error::{ApiError, CallbackError, ConnectionError, PendingRequests, ProtocolError};
use crate::reply::Reply;
use crate::request::{Argument, Request, RequestState};
use crate::tag::{Tag, TagSequence};
use crate::transport::{self, Stream};

/// Command that ends the session.
pub const QUIT_COMMAND: &str = "/quit";

/// Command that interrupts another request.
pub const CANCEL_COMMAND: &str = "/cancel";

/// One authenticated session with a device.
///
/// All operations take `&mut self`; share a connection across threads by
/// wrapping it in a `Mutex`.
pub struct Connection {
    config: ConnectionConfig,
    stream: Option<Stream>,
    assembler: SentenceAssembler,
    outstanding: BTreeMap<Tag, Request>,
    finished: BTreeMap<Tag, Reply>,
    tags: TagSequence,
    os_version: Option<String>,
}

impl Connection {
    /// Creates an unconnected connection. Call [`login`](Self::login)
    /// before issuing commands.
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            stream: None,
            assembler: SentenceAssembler::new(),
            outstanding: BTreeMap::new(),
            finished: BTreeMap::new(),
            tags: TagSequence::default(),
            os_version: None,
        }
    }

    /// Connects and logs in.
    ///
    /// # Errors
    ///
    /// Returns the first connect or login failure.
    pub fn open(config: ConnectionConfig) -> Result<Self, ApiError> {
        let mut connection = Self::new(config);
        connection.login()?;
        Ok(connection)
    }

    /// Sends `request` and returns its tag without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] without a socket,
    /// [`ProtocolError::AlreadySent`] or [`ProtocolError::InvalidState`] for
    /// a request that was sent before. A failed write ends the session like
    /// a `!fatal`: every outstanding request, this one included, receives
    /// it and [`ApiError::Fatal`] is returned.
    pub fn send(&mut self, request: Request) -> Result<Tag, ApiError> {
        let tag = self.tags.next_tag();
        self.transmit(tag, request)?;
        Ok(tag)
    }

    /// Builds and sends a request with one callback.
    ///
    /// # Errors
    ///
    /// As for [`send`](Self::send).
    pub fn dispatch<I, A, F>(
        &mut self,
        command: &str,
        arguments: I,
        await_completion: bool,
        callback: F,
    ) -> Result<Tag, ApiError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Argument>,
        F: FnMut(&mut ReplyContext<'_>, &Sentence) -> Result<(), CallbackError> + Send + 'static,
    {
        self.send(Request::new(command, arguments, await_completion).with_callback(callback))
    }

    /// Sends a request whose callback runs once, on completion.
    ///
    /// # Errors
    ///
    /// As for [`send`](Self::send).
    pub fn request<I, A, F>(&mut self, command: &str, arguments: I, callback: F) -> Result<Tag, ApiError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Argument>,
        F: FnMut(&mut ReplyContext<'_>, &Sentence) -> Result<(), CallbackError> + Send + 'static,
    {
        self.dispatch(command, arguments, true, callback)
    }

    /// Sends a request whose callback runs for every sentence.
    ///
    /// # Errors
    ///
    /// As for [`send`](Self::send).
    pub fn request_each<I, A, F>(
        &mut self,
        command: &str,
        arguments: I,
        callback: F,
    ) -> Result<Tag, ApiError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Argument>,
        F: FnMut(&mut ReplyContext<'_>, &Sentence) -> Result<(), CallbackError> + Send + 'static,
    {
        self.dispatch(command, arguments, false, callback)
    }

    /// Sends `request`, waits for it and returns its reply.
    ///
    /// # Errors
    ///
    /// Returns send errors and any error raised while pumping.
    pub fn exchange(&mut self, request: Request) -> Result<Reply, ApiError> {
        let tag = self.send(request.retain_reply())?;
        Ok(self.wait_for(tag)?.unwrap_or_default())
    }

    /// Runs `command` and returns its complete reply.
    ///
    /// # Errors
    ///
    /// As for [`exchange`](Self::exchange).
    pub fn get_reply<I, A>(&mut self, command: &str, arguments: I) -> Result<Reply, ApiError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Argument>,
    {
        self.exchange(Request::new(command, arguments, true))
    }

    /// Runs `command`, calling `callback` for every sentence, and returns
    /// the complete reply.
    ///
    /// # Errors
    ///
    /// As for [`exchange`](Self::exchange).
    pub fn get_reply_each<I, A, F>(
        &mut self,
        command: &str,
        arguments: I,
        callback: F,
    ) -> Result<Reply, ApiError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Argument>,
        F: FnMut(&mut ReplyContext<'_>, &Sentence) -> Result<(), CallbackError> + Send + 'static,
    {
        self.exchange(Request::new(command, arguments, false).with_callback(callback))
    }

    /// Issues `/cancel` for the request tagged `tag`.
    ///
    /// The canceled request stays outstanding until the device completes it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownTag`] if `tag` is not outstanding and
    /// [`ProtocolError::InvalidState`] unless it is in state
    /// [`RequestState::Sent`].
    pub fn cancel(&mut self, tag: Tag) -> Result<Tag, ApiError> {
        self.cancel_with(tag, cancel_request(tag, true))
    }

    /// Like [`cancel`](Self::cancel) with a per-sentence callback on the
    /// cancel request.
    ///
    /// # Errors
    ///
    /// As for [`cancel`](Self::cancel).
    pub fn cancel_each<F>(&mut self, tag: Tag, callback: F) -> Result<Tag, ApiError>
    where
        F: FnMut(&mut ReplyContext<'_>, &Sentence) -> Result<(), CallbackError> + Send + 'static,
    {
        self.cancel_with(tag, cancel_request(tag, false).with_callback(callback))
    }

    fn cancel_with(&mut self, tag: Tag, cancel: Request) -> Result<Tag, ApiError> {
        if self.stream.is_none() {
            return Err(ConnectionError::NotConnected.into());
        }
        let target = self
            .outstanding
            .get_mut(&tag)
            .ok_or_else(|| ProtocolError::UnknownTag {
                tag: tag.to_string(),
            })?;
        target.mark_canceled()?;
        debug!(target: CONNECTION_TARGET, %tag, "canceling request");
        self.send(cancel)
    }

    /// Pumps until `tag` completes and returns its reply if it was sent
    /// with [`Request::retain_reply`].
    ///
    /// # Errors
    ///
    /// Returns any error raised while pumping.
    pub fn wait_for(&mut self, tag: Tag) -> Result<Option<Reply>, ApiError> {
        while self.outstanding.contains_key(&tag) {
            self.pump()?;
        }
        Ok(self.finished.remove(&tag))
    }

    /// Pumps until no request is outstanding.
    ///
    /// # Errors
    ///
    /// Returns any error raised while pumping.
    pub fn wait_for_all(&mut self) -> Result<(), ApiError> {
        while !self.outstanding.is_empty() {
            self.pump()?;
        }
        Ok(())
    }

    /// Removes and returns a retained reply.
    pub fn take_reply(&mut self, tag: Tag) -> Option<Reply> {
        self.finished.remove(&tag)
    }

    /// Closes the socket and drops outstanding requests. Safe to repeat.
    pub fn close(&mut self) {
        let dropped = self.outstanding.len();
        self.outstanding.clear();
        self.assembler.clear();
        if let Some(stream) = self.stream.take() {
            stream.shutdown();
            info!(
                target: CONNECTION_TARGET,
                endpoint = %self.config.endpoint(),
                dropped,
                "connection closed"
            );
        }
    }

    /// Reports whether a socket is open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Device version recorded at login.
    #[must_use]
    pub fn os_version(&self) -> Option<&str> {
        self.os_version.as_deref()
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Tags of outstanding requests, ascending.
    #[must_use]
    pub fn outstanding_tags(&self) -> Vec<Tag> {
        self.outstanding.keys().copied().collect()
    }

    /// State of the outstanding request tagged `tag`.
    #[must_use]
    pub fn request_state(&self, tag: Tag) -> Option<RequestState> {
        self.outstanding.get(&tag).map(Request::state)
    }

    /// The connection parameters.
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Encodes and writes `request` under `tag`, then registers it.
    fn transmit(&mut self, tag: Tag, mut request: Request) -> Result<(), ApiError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ConnectionError::NotConnected.into());
        };
        request.mark_sent(tag)?;
        let bytes = request.encode(tag)?;
        if let Err(error) = stream.write_all(&bytes).and_then(|()| stream.flush()) {
            warn!(
                target: CONNECTION_TARGET,
                %tag,
                command = request.command(),
                %error,
                "socket write failed"
            );
            self.outstanding.insert(tag, request);
            return self.sweep(&pump::disconnected(&error.to_string()));
        }
        debug!(
            target: CONNECTION_TARGET,
            %tag,
            command = request.command(),
            await_completion = request.awaits_completion(),
            "sent request"
        );
        self.outstanding.insert(tag, request);
        Ok(())
    }

    /// Sends requests queued by callbacks, in queue order.
    fn transmit_queued(&mut self, queued: Vec<(Tag, Request)>) -> Result<(), ApiError> {
        for (tag, request) in queued {
            self.transmit(tag, request)?;
        }
        Ok(())
    }

    /// Drops the socket without touching the request table.
    fn teardown(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.shutdown();
            debug!(target: CONNECTION_TARGET, "socket torn down");
        }
    }

    fn pending_requests(&self) -> PendingRequests {
        PendingRequests(
            self.outstanding
                .iter()
                .map(|(tag, request)| (*tag, request.command().to_owned()))
                .collect(),
        )
    }

    #[cfg(test)]
    pub(crate) fn attach(&mut self, stream: std::net::TcpStream) {
        self.stream = Some(Stream::Tcp(stream));
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.config.endpoint())
            .field("connected", &self.is_connected())
            .field("outstanding", &self.outstanding_tags())
            .field("os_version", &self.os_version)
            .finish_non_exhaustive()
    }
}

/// Opens the socket if needed.
fn ensure_connected(connection: &mut Connection) -> Result<(), ApiError> {
    if connection.stream.is_none() {
        connection.assembler.clear();
        connection.stream = Some(transport::connect(&connection.config)?);
    }
    Ok(())
}
