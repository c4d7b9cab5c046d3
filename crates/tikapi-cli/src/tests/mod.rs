//! Runtime tests that drive [`crate::run`] against a fake device.

mod commands;
mod support;
