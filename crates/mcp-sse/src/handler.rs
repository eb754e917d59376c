//! Building blocks for answering requests.
pub mod server;
