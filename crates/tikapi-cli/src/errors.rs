//! Error types for the CLI runtime.

use std::io;

use thiserror::Error;
use tikapi::ApiError;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("login failed: {0}")]
    Login(ApiError),
    #[error("{0}")]
    Device(#[from] ApiError),
    #[error("failed to write output: {0}")]
    WriteOutput(io::Error),
    #[error("failed to read input: {0}")]
    ReadInput(io::Error),
    #[error("failed to serialise output: {0}")]
    Serialise(serde_json::Error),
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("destination '{destination}' does not follow a URL")]
    DestinationWithoutUrl { destination: String },
    #[error("unexpected reply to /quit: {reply}")]
    UnexpectedFarewell { reply: String },
}
