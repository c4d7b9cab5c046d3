//! Device-side file download through `/tool/fetch`.
//!
//! The device pulls a URL into its own file store and streams `!re` status
//! rows while it does. [`start_fetch`] translates those rows into
//! [`FetchProgress`] reports and cancels the command once the download has
//! finished, failed or stalled.

use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;
use tikapi_wire::{Sentence, SentenceKind};
use tracing::{debug, warn};
use url::Url;

use super::version::{compare_versions, leading_number};
use crate::CONNECTION_TARGET;
use crate::connection::Connection;
use crate::context::ReplyContext;
use crate::error::{ApiError, CallbackError};
use crate::reply::Reply;
use crate::request::{Argument, Request, RequestState};
use crate::tag::Tag;

/// Command path of the fetch tool.
pub const FETCH_COMMAND: &str = "/tool/fetch";

/// Newest version that only understands `mode`/`src-path` arguments.
const LEGACY_FETCH_VERSION: &str = "4.9";

/// What to download and where to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Source URL.
    pub url: Url,
    /// File name on the device. Defaults to the URL's last path segment.
    pub destination: Option<String>,
    /// Cancel when the downloaded size stops changing for this long.
    pub stall_timeout: Option<Duration>,
}

impl FetchOptions {
    /// Options for `url` with the default destination and no stall limit.
    #[must_use]
    pub const fn new(url: Url) -> Self {
        Self {
            url,
            destination: None,
            stall_timeout: None,
        }
    }

    /// Sets the destination file name.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Sets the stall timeout.
    #[must_use]
    pub const fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }

    /// The file name used on the device.
    #[must_use]
    pub fn destination_name(&self) -> String {
        if let Some(destination) = &self.destination {
            return destination.clone();
        }
        self.url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_owned()
    }

    /// Arguments for `/tool/fetch` on a device running `os_version`.
    #[must_use]
    pub fn arguments(&self, os_version: Option<&str>) -> Vec<Argument> {
        let destination = Argument::pair("dst-path", self.destination_name());
        let legacy = os_version.is_some_and(|version| {
            compare_versions(version, LEGACY_FETCH_VERSION) != Ordering::Greater
        });
        if !legacy {
            return vec![Argument::pair("url", self.url.as_str()), destination];
        }

        let mut source = self.url.path().to_owned();
        if let Some(query) = self.url.query().filter(|query| !query.is_empty()) {
            source.push('?');
            source.push_str(query);
        }
        let mut arguments = vec![
            Argument::pair("mode", self.url.scheme()),
            Argument::pair("src-path", source),
            destination,
        ];
        match self.url.scheme() {
            "http" => arguments.push(Argument::pair("port", "80")),
            "https" => arguments.push(Argument::pair("port", "443")),
            _ => {}
        }
        arguments
    }
}

/// Download state reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    /// Connecting to the source.
    Connecting,
    /// Connected; request sent.
    Requesting,
    /// Transfer under way.
    Downloading,
    /// Transfer complete.
    Finished,
    /// Transfer failed.
    Failed,
    /// The command trapped with this message.
    Trap(String),
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Requesting => f.write_str("requesting"),
            Self::Downloading => f.write_str("downloading"),
            Self::Finished => f.write_str("finished"),
            Self::Failed => f.write_str("failed"),
            Self::Trap(message) => write!(f, "trap: {message}"),
        }
    }
}

/// One progress report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchProgress {
    /// Current status.
    pub status: FetchStatus,
    /// Total size as reported by the device (KiB).
    pub total: u64,
    /// Downloaded size as reported by the device (KiB).
    pub downloaded: u64,
    /// Tag of the fetch request.
    pub tag: Tag,
}

/// Status rows the fetch helper cannot interpret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// A `!re` row without `status`.
    #[error("fetch reply is missing 'status'")]
    MissingStatus,
    /// A `status` value outside the known set.
    #[error("unknown fetch status '{status}'")]
    UnknownStatus {
        /// The reported status.
        status: String,
    },
}

/// Starts a download and returns the fetch request's tag.
///
/// `progress` runs for each status row and for a trap. The request is
/// canceled after `finished` or `failed`, and when the stall timeout
/// expires.
///
/// # Errors
///
/// Returns errors from sending the request.
pub fn start_fetch<F>(
    connection: &mut Connection,
    options: &FetchOptions,
    progress: F,
) -> Result<Tag, ApiError>
where
    F: FnMut(&FetchProgress) -> Result<(), CallbackError> + Send + 'static,
{
    let request = fetch_request(connection, options, progress);
    connection.send(request)
}

/// Runs a download to completion and returns the fetch reply.
///
/// # Errors
///
/// Returns send errors, progress callback failures and any error raised
/// while waiting.
pub fn fetch<F>(connection: &mut Connection, options: &FetchOptions, progress: F) -> Result<Reply, ApiError>
where
    F: FnMut(&FetchProgress) -> Result<(), CallbackError> + Send + 'static,
{
    let request = fetch_request(connection, options, progress);
    connection.exchange(request)
}

fn fetch_request<F>(connection: &Connection, options: &FetchOptions, progress: F) -> Request
where
    F: FnMut(&FetchProgress) -> Result<(), CallbackError> + Send + 'static,
{
    let arguments = options.arguments(connection.os_version());
    debug!(
        target: CONNECTION_TARGET,
        url = %options.url,
        destination = %options.destination_name(),
        "starting fetch"
    );
    let mut tracker = FetchTracker::new(options.stall_timeout, progress);
    Request::new(FETCH_COMMAND, arguments, false)
        .with_callback(move |context, sentence| tracker.observe(context, sentence))
}

struct FetchTracker<F> {
    progress: F,
    stall_timeout: Option<Duration>,
    total: u64,
    downloaded: u64,
    last_activity: Instant,
    done: bool,
}

impl<F> FetchTracker<F>
where
    F: FnMut(&FetchProgress) -> Result<(), CallbackError>,
{
    fn new(stall_timeout: Option<Duration>, progress: F) -> Self {
        Self {
            progress,
            stall_timeout,
            total: 0,
            downloaded: 0,
            last_activity: Instant::now(),
            done: false,
        }
    }

    fn observe(
        &mut self,
        context: &mut ReplyContext<'_>,
        sentence: &Sentence,
    ) -> Result<(), CallbackError> {
        if self.done {
            return Ok(());
        }
        match sentence.kind() {
            Some(SentenceKind::Re) => self.observe_status(context, sentence),
            Some(SentenceKind::Trap) => {
                let message = sentence.message().unwrap_or("unknown error").to_owned();
                self.report(context, FetchStatus::Trap(message))
            }
            _ => Ok(()),
        }
    }

    fn observe_status(
        &mut self,
        context: &mut ReplyContext<'_>,
        sentence: &Sentence,
    ) -> Result<(), CallbackError> {
        let status = sentence.value("status").ok_or(FetchError::MissingStatus)?;
        match status {
            "connecting" => self.report(context, FetchStatus::Connecting),
            "requesting" => self.report(context, FetchStatus::Requesting),
            "downloading" => {
                self.total = sentence.value("total").map_or(0, leading_number);
                let downloaded = sentence.value("downloaded").map_or(0, leading_number);
                if downloaded != self.downloaded {
                    self.downloaded = downloaded;
                    self.last_activity = Instant::now();
                } else if self.is_stalled() {
                    warn!(
                        target: CONNECTION_TARGET,
                        tag = %context.tag(),
                        downloaded,
                        "fetch stalled; canceling"
                    );
                    cancel_if_sent(context)?;
                }
                self.report(context, FetchStatus::Downloading)
            }
            "finished" => {
                self.downloaded = self.total;
                self.done = true;
                self.report(context, FetchStatus::Finished)?;
                cancel_if_sent(context)
            }
            "failed" => {
                self.done = true;
                self.report(context, FetchStatus::Failed)?;
                cancel_if_sent(context)
            }
            other => Err(FetchError::UnknownStatus {
                status: other.to_owned(),
            }
            .into()),
        }
    }

    fn is_stalled(&self) -> bool {
        self.stall_timeout
            .is_some_and(|timeout| !timeout.is_zero() && self.last_activity.elapsed() > timeout)
    }

    fn report(&mut self, context: &ReplyContext<'_>, status: FetchStatus) -> Result<(), CallbackError> {
        let (total, downloaded) = match status {
            FetchStatus::Connecting | FetchStatus::Requesting => (0, 0),
            _ => (self.total, self.downloaded),
        };
        (self.progress)(&FetchProgress {
            status,
            total,
            downloaded,
            tag: context.tag(),
        })
    }
}

fn cancel_if_sent(context: &mut ReplyContext<'_>) -> Result<(), CallbackError> {
    if context.state() == RequestState::Sent {
        context.cancel()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn options(url: &str) -> FetchOptions {
        FetchOptions::new(Url::parse(url).expect("url"))
    }

    fn tokens(arguments: &[Argument]) -> Vec<String> {
        arguments.iter().map(Argument::to_token).collect()
    }

    #[rstest]
    #[case("http://example.com/pub/routeros.npk", "routeros.npk")]
    #[case("https://example.com/", "")]
    fn destination_defaults_to_last_segment(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(options(url).destination_name(), expected);
    }

    #[rstest]
    fn explicit_destination_wins() {
        let options = options("http://example.com/a.rsc").with_destination("b.rsc");

        assert_eq!(options.destination_name(), "b.rsc");
    }

    #[rstest]
    #[case(Some("7.15.3 (stable)"))]
    #[case(Some("4.10"))]
    #[case(None)]
    fn modern_devices_get_url_arguments(#[case] version: Option<&str>) {
        let options = options("https://example.com/files/a.rsc?x=1");

        assert_eq!(
            tokens(&options.arguments(version)),
            vec!["=url=https://example.com/files/a.rsc?x=1", "=dst-path=a.rsc"]
        );
    }

    #[rstest]
    #[case("http://example.com/files/a.rsc", "http", "/files/a.rsc", Some("=port=80"))]
    #[case("https://example.com/files/a.rsc?x=1", "https", "/files/a.rsc?x=1", Some("=port=443"))]
    #[case("ftp://example.com/a.rsc", "ftp", "/a.rsc", None)]
    fn legacy_devices_get_mode_and_path(
        #[case] url: &str,
        #[case] mode: &str,
        #[case] source: &str,
        #[case] port: Option<&str>,
    ) {
        let mut expected = vec![
            format!("=mode={mode}"),
            format!("=src-path={source}"),
            "=dst-path=a.rsc".to_owned(),
        ];
        expected.extend(port.map(str::to_owned));

        assert_eq!(tokens(&options(url).arguments(Some("4.9"))), expected);
    }
}
