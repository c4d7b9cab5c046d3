//! Blocking client for the RouterOS API.
//!
//! A [`Connection`] owns one socket to a device, authenticates on
//! [`Connection::login`], and multiplexes any number of tagged [`Request`]s
//! over it. Replies arrive interleaved; [`Connection::pump`] reads them,
//! correlates each sentence to its request by `.tag`, and runs the request's
//! callbacks. Callbacks never see the connection itself. They receive a
//! [`ReplyContext`] through which they can cancel their request or queue new
//! ones, which the connection transmits once the callbacks return.
//!
//! A device `!fatal` (or the peer closing the socket) terminates every
//! outstanding request at once: each one is completed with the fatal sentence
//! and its callbacks run before the error surfaces.
//!
//! Higher-level helpers built only on that public contract live in [`ops`].

mod config;
mod connection;
mod context;
mod error;
pub mod ops;
mod reply;
mod request;
mod tag;
mod transport;

#[cfg(test)]
mod tests;

pub use config::{
    ConnectionConfig, DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PLAIN_PORT,
    DEFAULT_TLS_PORT, DEFAULT_USER,
};
pub use connection::{CANCEL_COMMAND, Connection, QUIT_COMMAND};
pub use context::ReplyContext;
pub use error::{ApiError, CallbackError, ConnectionError, PendingRequests, ProtocolError};
pub use reply::Reply;
pub use request::{Argument, ReplyCallback, Request, RequestState};
pub use tag::{Tag, TagParseError};
pub use tikapi_wire::{Sentence, SentenceKind};

/// Log target for connection lifecycle and dispatch events.
pub const CONNECTION_TARGET: &str = "tikapi::connection";

/// Log target for the login handshake.
pub const LOGIN_TARGET: &str = "tikapi::login";
