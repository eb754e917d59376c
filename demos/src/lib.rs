//! Shared pieces of the `sse-server` and `sse-client` demos.
pub mod common;
