//! Connection tests against a scripted fake device.

mod behaviour;
mod support;
