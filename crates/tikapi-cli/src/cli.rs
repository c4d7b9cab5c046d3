//! CLI argument definitions for the `tikapi` client.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tikapi::{ConnectionConfig, DEFAULT_USER};

use crate::telemetry::LogFormat;

/// How sentences are written to stdout.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// One `!re key=value ...` line per sentence.
    #[default]
    Human,
    /// One JSON object per sentence.
    Json,
}

/// Command-line interface for the RouterOS API client.
#[derive(Parser, Debug)]
#[command(name = "tikapi", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Device connection parameters.
    #[command(flatten)]
    pub(crate) connection: ConnectionArgs,
    /// Tracing filter directives, e.g. `tikapi=debug` or `tikapi::wire=trace`.
    #[arg(long, env = "TIKAPI_LOG_FILTER", default_value = "warn", global = true)]
    pub(crate) log_filter: String,
    /// Log line format written to stderr.
    #[arg(long, env = "TIKAPI_LOG_FORMAT", default_value_t = LogFormat::Compact, global = true)]
    pub(crate) log_format: LogFormat,
    /// Controls how replies are rendered.
    #[arg(long, value_enum, default_value_t = OutputFormat::Human, global = true)]
    pub(crate) output: OutputFormat,
    /// The operation to run.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Flags describing how to reach and log in to the device.
#[derive(Args, Debug, Clone)]
pub(crate) struct ConnectionArgs {
    /// Device host name or address.
    #[arg(long, short = 'H', env = "TIKAPI_HOST")]
    pub(crate) host: String,
    /// API port. Defaults to 8728, or 8729 with `--tls`.
    #[arg(long, short = 'p', env = "TIKAPI_PORT")]
    pub(crate) port: Option<u16>,
    /// Login user.
    #[arg(long, short = 'u', env = "TIKAPI_USER", default_value = DEFAULT_USER)]
    pub(crate) user: String,
    /// Login password.
    #[arg(long, env = "TIKAPI_PASSWORD", default_value = "", hide_env_values = true)]
    pub(crate) password: String,
    /// Connect over TLS.
    #[arg(long, env = "TIKAPI_TLS")]
    pub(crate) tls: bool,
    /// Accept any TLS certificate the device presents.
    #[arg(long, requires = "tls")]
    pub(crate) insecure: bool,
    /// Send the password in `/login` without a challenge, even without TLS.
    #[arg(long, env = "TIKAPI_PLAINTEXT_LOGIN")]
    pub(crate) plaintext_login: bool,
    /// Seconds allowed for connecting and the TLS handshake.
    #[arg(long, value_name = "SECONDS", default_value_t = 10)]
    pub(crate) connect_timeout: u64,
    /// Seconds of silence tolerated while replies are outstanding.
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    pub(crate) command_timeout: u64,
}

impl ConnectionArgs {
    /// Builds the library configuration from the parsed flags.
    pub(crate) fn to_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.host.as_str())
            .with_credentials(self.user.as_str(), self.password.as_str())
            .with_tls(self.tls)
            .with_certificate_verification(!self.insecure)
            .with_plaintext_login(self.plaintext_login)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_command_timeout(Duration::from_secs(self.command_timeout));
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        config
    }
}

/// Operations offered by the client.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Runs one command and prints its reply.
    Exec {
        /// Cancel after this many sentences; 0 disables the limit.
        #[arg(long, short = 'n', value_name = "COUNT")]
        limit: Option<usize>,
        /// Command path, e.g. `/interface/print`.
        #[arg(value_name = "COMMAND")]
        command: String,
        /// API words, e.g. `=.proplist=name` or `?type=ether`.
        #[arg(value_name = "WORD", num_args = 0.., allow_hyphen_values = true)]
        words: Vec<String>,
    },
    /// Makes the device download files, then lists its file store.
    Fetch {
        /// Cancel a download whose size stops growing for this many seconds;
        /// 0 disables the check.
        #[arg(long, value_name = "SECONDS", default_value_t = 120)]
        stall_timeout: u64,
        /// URLs, each optionally followed by the destination file name.
        #[arg(value_name = "URL [FILE]", required = true, num_args = 1..)]
        targets: Vec<String>,
    },
    /// Reads commands from stdin until `/quit`.
    Shell,
}
