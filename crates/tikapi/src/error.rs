//! Error types for the API client.

use std::fmt;
use std::io;

use thiserror::Error;
use tikapi_wire::{AssemblyError, EncodingError, FramingError};

use crate::request::RequestState;
use crate::tag::Tag;

/// Error returned by a reply callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by [`Connection`](crate::Connection) operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A received word header could not be decoded.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// An outgoing word could not be encoded.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// The exchange broke a protocol rule.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The device rejected the credentials.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Message reported by the device.
        message: String,
    },

    /// Transport failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// No bytes arrived within the command timeout.
    #[error("no reply within {timeout_secs}s; {pending}")]
    Timeout {
        /// The timeout in seconds.
        timeout_secs: u64,
        /// Requests still waiting for replies.
        pending: PendingRequests,
    },

    /// The device sent `!fatal` or closed the connection.
    #[error("device terminated the connection: {message}")]
    Fatal {
        /// Message carried by the fatal sentence.
        message: String,
    },

    /// A reply callback failed.
    #[error("reply callback for request {tag} failed")]
    Callback {
        /// Tag of the request whose callback failed.
        tag: Tag,
        /// The callback's error.
        #[source]
        source: CallbackError,
    },
}

impl ApiError {
    /// Creates an authentication error.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Reports whether the socket is unusable after this error.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Fatal { .. } | Self::Connection(_) | Self::Authentication { .. }
        )
    }
}

impl From<AssemblyError> for ApiError {
    fn from(error: AssemblyError) -> Self {
        match error {
            AssemblyError::Framing(framing) => Self::Framing(framing),
            AssemblyError::EmptySentence => Self::Protocol(ProtocolError::EmptySentence),
        }
    }
}

/// Protocol rule violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A terminator arrived with no words before it.
    #[error("received an empty sentence")]
    EmptySentence,

    /// A non-fatal sentence without `.tag`.
    #[error("received untagged sentence: {sentence}")]
    Untagged {
        /// The sentence as received.
        sentence: String,
    },

    /// A tag that matches no outstanding request.
    #[error("received sentence for unknown tag {tag:?}")]
    UnknownTag {
        /// The raw tag value.
        tag: String,
    },

    /// A sentence for a request that already completed.
    #[error("received sentence for completed request {tag}")]
    AfterCompletion {
        /// Tag of the completed request.
        tag: Tag,
    },

    /// An operation that the request's state does not allow.
    #[error("cannot {operation} request in state {state}")]
    InvalidState {
        /// The refused operation.
        operation: &'static str,
        /// State of the request.
        state: RequestState,
    },

    /// A request that already carries a tag.
    #[error("request already sent with tag {tag}")]
    AlreadySent {
        /// The existing tag.
        tag: Tag,
    },

    /// A login reply of unexpected shape.
    #[error("unexpected login reply: {reply}")]
    UnexpectedLoginReply {
        /// The reply as received.
        reply: String,
    },

    /// Pumping with no outstanding requests.
    #[error("no outstanding requests to wait for")]
    NothingOutstanding,

    /// Bytes left in the receive buffer after `!fatal`.
    #[error("{count} bytes received after fatal sentence")]
    TrailingBytes {
        /// Number of undecoded bytes.
        count: usize,
    },
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The host name did not resolve.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        /// `host:port` being resolved.
        endpoint: String,
        /// The resolver error.
        #[source]
        source: io::Error,
    },

    /// No resolved address accepted the connection.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// `host:port` being connected.
        endpoint: String,
        /// The last connect error.
        #[source]
        source: io::Error,
    },

    /// TLS configuration could not be built.
    #[error("TLS setup failed: {source}")]
    Tls {
        /// The rustls error.
        #[source]
        source: rustls::Error,
    },

    /// The TLS handshake failed.
    #[error("TLS handshake with {endpoint} failed: {source}")]
    TlsHandshake {
        /// `host:port` of the device.
        endpoint: String,
        /// The handshake error.
        #[source]
        source: io::Error,
    },

    /// The host is not a valid TLS server name.
    #[error("invalid TLS server name: {host}")]
    InvalidServerName {
        /// The rejected host.
        host: String,
    },

    /// The operation needs a live socket.
    #[error("not connected")]
    NotConnected,

    /// A socket option could not be applied.
    #[error("socket I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Tags and commands of requests still waiting for replies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingRequests(pub Vec<(Tag, String)>);

impl PendingRequests {
    /// Number of pending requests.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Reports whether nothing is pending.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PendingRequests {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.0.len() == 1 {
            "request"
        } else {
            "requests"
        };
        write!(f, "{} pending {noun}", self.0.len())?;
        for (index, (tag, command)) in self.0.iter().enumerate() {
            let separator = if index == 0 { ": " } else { ", " };
            write!(f, "{separator}{tag} '{command}'")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn pending_requests_name_tags_and_commands() {
        let pending = PendingRequests(vec![
            (Tag::new(3), "/a".to_owned()),
            (Tag::new(4), "/b".to_owned()),
        ]);

        assert_eq!(pending.to_string(), "2 pending requests: 3 '/a', 4 '/b'");
    }

    #[rstest]
    fn single_pending_request_is_singular() {
        let pending = PendingRequests(vec![(Tag::new(0), "/system/resource/print".to_owned())]);

        assert_eq!(
            pending.to_string(),
            "1 pending request: 0 '/system/resource/print'"
        );
    }

    #[rstest]
    fn empty_sentence_maps_to_protocol_error() {
        let error = ApiError::from(AssemblyError::EmptySentence);

        assert!(matches!(
            error,
            ApiError::Protocol(ProtocolError::EmptySentence)
        ));
    }

    #[rstest]
    fn timeout_message_lists_pending_requests() {
        let error = ApiError::Timeout {
            timeout_secs: 30,
            pending: PendingRequests(vec![(Tag::new(7), "/tool/fetch".to_owned())]),
        };

        assert_eq!(
            error.to_string(),
            "no reply within 30s; 1 pending request: 7 '/tool/fetch'"
        );
    }
}
