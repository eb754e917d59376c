//! Server side of the SSE transport.
//!
//! Every `GET` on the stream path opens a [`Session`] in the shared
//! [`SessionRegistry`] and yields one [`SseServerTransport`]. The first event
//! written to the stream is always `endpoint`, carrying the absolute url the
//! client POSTs to:
//!
//! ```text
//! event: endpoint
//! data: http://127.0.0.1:3001/message?sessionId=2b7c...
//! ```
//!
//! ```ignore
//! use mcp_sse::transport::SseServer;
//! let server = SseServer::serve("127.0.0.1:3001".parse()?).await?;
//! ```
pub mod common;
pub mod session;
pub mod transport;

mod axum_impl;

pub use axum_impl::{PostEventQuery, SseServer};
pub use common::{DEFAULT_AUTO_PING_INTERVAL, SessionId, SseServerConfig, session_id};
pub use session::{Session, SessionChannels, SessionRegistry};
pub use transport::SseServerTransport;
