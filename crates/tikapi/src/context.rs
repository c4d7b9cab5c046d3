//! Callback view of a request being delivered.

use tikapi_wire::Sentence;
use tracing::debug;

use crate::CONNECTION_TARGET;
use crate::connection::CANCEL_COMMAND;
use crate::error::{ApiError, CallbackError, ProtocolError};
use crate::reply::Reply;
use crate::request::{Argument, Request, RequestState};
use crate::tag::{Tag, TagSequence};

/// What a reply callback may see and do.
///
/// The context borrows the request being delivered. Requests issued through
/// it are queued and transmitted once every callback for the current sentence
/// has returned.
pub struct ReplyContext<'a> {
    tag: Tag,
    request: &'a mut Request,
    tags: &'a mut TagSequence,
    queued: &'a mut Vec<(Tag, Request)>,
}

impl<'a> ReplyContext<'a> {
    pub(crate) const fn new(
        tag: Tag,
        request: &'a mut Request,
        tags: &'a mut TagSequence,
        queued: &'a mut Vec<(Tag, Request)>,
    ) -> Self {
        Self {
            tag,
            request,
            tags,
            queued,
        }
    }

    /// Tag of the request being delivered.
    #[must_use]
    pub const fn tag(&self) -> Tag {
        self.tag
    }

    /// Command of the request being delivered.
    #[must_use]
    pub const fn command(&self) -> &str {
        self.request.command()
    }

    /// State of the request being delivered.
    #[must_use]
    pub const fn state(&self) -> RequestState {
        self.request.state()
    }

    /// Sentences received so far, including the current one.
    #[must_use]
    pub const fn reply(&self) -> &Reply {
        self.request.reply()
    }

    /// Whether the request has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.request.is_complete()
    }

    /// Queues `/cancel` for this request and marks it canceled.
    ///
    /// Returns the tag of the queued cancel request.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidState`] unless the request is in
    /// state [`RequestState::Sent`].
    pub fn cancel(&mut self) -> Result<Tag, ProtocolError> {
        let cancel = cancel_request(self.tag, true);
        self.queue_cancel(cancel)
    }

    /// Like [`cancel`](Self::cancel) but the cancel request's callback runs
    /// for every sentence of its reply.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidState`] unless the request is in
    /// state [`RequestState::Sent`].
    pub fn cancel_each<F>(&mut self, callback: F) -> Result<Tag, ProtocolError>
    where
        F: FnMut(&mut ReplyContext<'_>, &Sentence) -> Result<(), CallbackError> + Send + 'static,
    {
        let cancel = cancel_request(self.tag, false).with_callback(callback);
        self.queue_cancel(cancel)
    }

    /// Queues a new request and returns its tag.
    pub fn dispatch(&mut self, request: Request) -> Tag {
        let tag = self.tags.next_tag();
        debug!(
            target: CONNECTION_TARGET,
            %tag,
            command = request.command(),
            "queued request from callback"
        );
        self.queued.push((tag, request));
        tag
    }

    fn queue_cancel(&mut self, cancel: Request) -> Result<Tag, ProtocolError> {
        self.request.mark_canceled()?;
        Ok(self.dispatch(cancel))
    }
}

/// Builds `/cancel =tag=<target>`.
pub(crate) fn cancel_request(target: Tag, await_completion: bool) -> Request {
    Request::new(
        CANCEL_COMMAND,
        [Argument::pair("tag", target.to_string())],
        await_completion,
    )
}

/// Runs the callbacks of `request` for `sentence`.
///
/// Callbacks run in registration order and the first failure stops the rest.
pub(crate) fn run_callbacks(
    tag: Tag,
    request: &mut Request,
    tags: &mut TagSequence,
    queued: &mut Vec<(Tag, Request)>,
    sentence: &Sentence,
) -> Result<(), ApiError> {
    let mut callbacks = request.take_callbacks();
    let mut outcome = Ok(());
    {
        let mut context = ReplyContext::new(tag, request, tags, queued);
        for callback in &mut callbacks {
            if let Err(source) = callback(&mut context, sentence) {
                outcome = Err(ApiError::Callback { tag, source });
                break;
            }
        }
    }
    request.restore_callbacks(callbacks);
    outcome
}
