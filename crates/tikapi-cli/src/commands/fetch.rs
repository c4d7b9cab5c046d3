//! Device-side downloads with progress reporting.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tikapi::ops::{FetchOptions, FetchProgress, FetchStatus, start_fetch};
use tikapi::{Argument, Connection, ConnectionConfig, Tag};
use tracing::debug;
use url::Url;

use super::quit;
use crate::CLI_TARGET;
use crate::cli::OutputFormat;
use crate::errors::AppError;
use crate::output::{Renderer, line};

const FILE_LIST_COMMAND: &str = "/file/getall";

/// A URL with an optional destination file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FetchTarget {
    pub(crate) url: Url,
    pub(crate) destination: Option<String>,
}

/// Pairs each URL argument with the file name that follows it, if any.
pub(crate) fn parse_targets(arguments: &[String]) -> Result<Vec<FetchTarget>, AppError> {
    let mut targets: Vec<FetchTarget> = Vec::new();
    for argument in arguments {
        if argument.contains("://") {
            let url = Url::parse(argument).map_err(|source| AppError::InvalidUrl {
                url: argument.clone(),
                source,
            })?;
            targets.push(FetchTarget {
                url,
                destination: None,
            });
            continue;
        }
        match targets.last_mut() {
            Some(target) if target.destination.is_none() => {
                target.destination = Some(argument.clone());
            }
            _ => {
                return Err(AppError::DestinationWithoutUrl {
                    destination: argument.clone(),
                });
            }
        }
    }
    Ok(targets)
}

/// Progress bookkeeping for one download.
struct Download {
    file: String,
    url: String,
    started: Instant,
    last_downloaded: u64,
}

impl Download {
    fn new(file: String, url: String) -> Self {
        Self {
            file,
            url,
            started: Instant::now(),
            last_downloaded: 0,
        }
    }

    /// Human-readable line for `report`.
    fn describe(&mut self, report: &FetchProgress) -> String {
        let file = &self.file;
        match &report.status {
            FetchStatus::Connecting => {
                self.started = Instant::now();
                format!(">>> OK: Connecting to '{}' to download file '{file}'", self.url)
            }
            FetchStatus::Requesting => {
                self.started = Instant::now();
                format!(">>> OK: Connected. Sending request for '{file}'...")
            }
            FetchStatus::Downloading => {
                let total = report.total;
                let percent = report
                    .downloaded
                    .saturating_mul(100)
                    .checked_div(total)
                    .unwrap_or(0);
                let stalled = if report.downloaded == self.last_downloaded {
                    " *STALLED*"
                } else {
                    ""
                };
                self.last_downloaded = report.downloaded;
                format!(
                    ">>> OK: Downloaded {} KiB of {total} KiB of '{file}' ({percent}%){stalled}",
                    report.downloaded
                )
            }
            FetchStatus::Finished => format!(
                ">>> OK: File '{file}' download finished in {:.2?}.",
                self.started.elapsed()
            ),
            FetchStatus::Failed => format!(">>> ERROR: File '{file}' download failed!"),
            FetchStatus::Trap(message) => {
                format!(">>> ERROR: The following trap error occurred: {message}")
            }
        }
    }
}

/// Fetches every target, then prints the device's file list.
///
/// Targets whose file name already exists on the device are skipped.
pub(crate) fn run<W: Write>(
    config: ConnectionConfig,
    arguments: &[String],
    stall_timeout: Duration,
    renderer: Renderer,
    stdout: &mut W,
) -> Result<(), AppError> {
    let targets = parse_targets(arguments)?;
    let mut connection = Connection::open(config).map_err(AppError::Login)?;
    let existing = file_names(&mut connection)?;

    let (sender, receiver) = mpsc::channel::<FetchProgress>();
    let mut downloads: BTreeMap<Tag, Download> = BTreeMap::new();
    for target in targets {
        let mut options = FetchOptions::new(target.url).with_stall_timeout(stall_timeout);
        if let Some(destination) = target.destination {
            options = options.with_destination(destination);
        }
        let file = options.destination_name();
        if existing.contains(&file) {
            line(
                stdout,
                &format!(">>> ERROR: There is a file named '{file}' already on the device."),
            )?;
            continue;
        }
        line(
            stdout,
            &format!(">>> OK: Fetching file '{file}' from URL '{}'...", options.url),
        )?;
        let progress = sender.clone();
        let tag = start_fetch(&mut connection, &options, move |report| {
            progress.send(report.clone())?;
            Ok(())
        })?;
        debug!(target: CLI_TARGET, %tag, %file, "fetch started");
        downloads.insert(tag, Download::new(file, options.url.to_string()));
    }
    drop(sender);

    while connection.outstanding() > 0 {
        let pumped = connection.pump();
        for report in receiver.try_iter() {
            let Some(download) = downloads.get_mut(&report.tag) else {
                continue;
            };
            let description = download.describe(&report);
            match renderer.format() {
                OutputFormat::Human => line(stdout, &description)?,
                OutputFormat::Json => renderer.progress_event(stdout, &download.file, &report)?,
            }
        }
        pumped?;
    }

    list_files(&mut connection, renderer, stdout)?;
    quit(&mut connection)?;
    Ok(())
}

fn file_names(connection: &mut Connection) -> Result<BTreeSet<String>, AppError> {
    let reply = connection.get_reply(FILE_LIST_COMMAND, Vec::<Argument>::new())?;
    Ok(reply
        .rows()
        .filter_map(|row| row.value("name").map(str::to_owned))
        .collect())
}

fn list_files<W: Write>(
    connection: &mut Connection,
    renderer: Renderer,
    stdout: &mut W,
) -> Result<(), AppError> {
    let reply = connection.get_reply(FILE_LIST_COMMAND, Vec::<Argument>::new())?;
    if renderer.format() == OutputFormat::Json {
        for row in reply.rows() {
            renderer.sentence(stdout, row)?;
        }
        return Ok(());
    }
    line(stdout, "")?;
    line(stdout, "SIZE        CREATED               FILENAME")?;
    line(stdout, &"=".repeat(68))?;
    for row in reply.rows() {
        line(
            stdout,
            &format!(
                "{:<10}  {}  {}",
                row.value("size").unwrap_or_default(),
                row.value("creation-time").unwrap_or_default(),
                row.value("name").unwrap_or_default()
            ),
        )?;
    }
    line(stdout, "")
}
