pub mod endpoint;

#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
mod reqwest;

#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod sse;

/// Event kinds used on the SSE stream.
pub mod event {
    pub const ENDPOINT: &str = "endpoint";
    pub const OPEN: &str = "open";
    pub const ERROR: &str = "error";
    pub const MESSAGE: &str = "message";
}

pub const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";
pub const JSON_MIME_TYPE: &str = "application/json";
