//! Rendering replies and progress reports to stdout.

use std::io::Write;

use serde::Serialize;
use tikapi::ops::FetchProgress;
use tikapi::{Sentence, SentenceKind};

use crate::cli::OutputFormat;
use crate::errors::AppError;

/// Writes sentences in the selected format.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Renderer {
    format: OutputFormat,
}

#[derive(Serialize)]
struct ProgressEvent<'a> {
    tag: u64,
    file: &'a str,
    status: String,
    total: u64,
    downloaded: u64,
}

impl Renderer {
    pub(crate) const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub(crate) const fn format(self) -> OutputFormat {
        self.format
    }

    /// Writes one reply sentence.
    ///
    /// Human output shows traps as a `=== TRAP` notice and every other
    /// sentence as its words on one line.
    pub(crate) fn sentence<W: Write>(self, out: &mut W, sentence: &Sentence) -> Result<(), AppError> {
        match self.format {
            OutputFormat::Human if sentence.is(SentenceKind::Trap) => writeln!(
                out,
                "=== TRAP: '{}'",
                sentence.message().unwrap_or("unknown error")
            ),
            OutputFormat::Human => writeln!(out, "{sentence}"),
            OutputFormat::Json => {
                let json = serde_json::to_string(sentence).map_err(AppError::Serialise)?;
                writeln!(out, "{json}")
            }
        }
        .map_err(AppError::WriteOutput)
    }

    /// Writes a fetch progress report as a JSON event.
    pub(crate) fn progress_event<W: Write>(
        self,
        out: &mut W,
        file: &str,
        report: &FetchProgress,
    ) -> Result<(), AppError> {
        let event = ProgressEvent {
            tag: report.tag.get(),
            file,
            status: report.status.to_string(),
            total: report.total,
            downloaded: report.downloaded,
        };
        let json = serde_json::to_string(&event).map_err(AppError::Serialise)?;
        writeln!(out, "{json}").map_err(AppError::WriteOutput)
    }
}

/// Writes a plain line.
pub(crate) fn line<W: Write>(out: &mut W, text: &str) -> Result<(), AppError> {
    writeln!(out, "{text}").map_err(AppError::WriteOutput)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tikapi::Tag;
    use tikapi::ops::FetchStatus;

    use super::*;

    fn render(format: OutputFormat, sentence: &Sentence) -> String {
        let mut out = Vec::new();
        Renderer::new(format)
            .sentence(&mut out, sentence)
            .expect("render");
        String::from_utf8(out).expect("utf-8")
    }

    #[rstest]
    #[case(OutputFormat::Human, "!re name=ether1 disabled\n")]
    #[case(OutputFormat::Json, "{\"!re\":null,\"name\":\"ether1\",\"disabled\":null}\n")]
    fn renders_rows(#[case] format: OutputFormat, #[case] expected: &str) {
        let row: Sentence = [("!re", None), ("name", Some("ether1")), ("disabled", None)]
            .into_iter()
            .collect();

        assert_eq!(render(format, &row), expected);
    }

    #[rstest]
    fn renders_traps_as_notices() {
        let trap: Sentence = [("!trap", None), ("message", Some("no such command"))]
            .into_iter()
            .collect();

        assert_eq!(
            render(OutputFormat::Human, &trap),
            "=== TRAP: 'no such command'\n"
        );
    }

    #[rstest]
    fn renders_progress_events() {
        let mut out = Vec::new();
        let report = FetchProgress {
            status: FetchStatus::Downloading,
            total: 10,
            downloaded: 4,
            tag: Tag::new(5),
        };

        Renderer::new(OutputFormat::Json)
            .progress_event(&mut out, "a.rsc", &report)
            .expect("render");

        assert_eq!(
            String::from_utf8(out).expect("utf-8"),
            "{\"tag\":5,\"file\":\"a.rsc\",\"status\":\"downloading\",\"total\":10,\"downloaded\":4}\n"
        );
    }
}
