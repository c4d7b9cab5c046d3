//! Helpers built on the public request and callback API.

mod bulk;
mod fetch;
mod version;

pub use bulk::{Command, MAX_REPLIES, limited_request, reply_limit, run_commands};
pub use fetch::{
    FETCH_COMMAND, FetchError, FetchOptions, FetchProgress, FetchStatus, fetch, start_fetch,
};
pub use version::compare_versions;
