use std::{borrow::Cow, time::Duration};

pub use crate::model::DecodeError;
use crate::model::ErrorData;

impl std::fmt::Display for ErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.0, self.message)?;
        if let Some(data) = &self.data {
            write!(f, "({})", data)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorData {}

/// Lifecycle misuse and I/O failures of a transport.
///
/// Returned to the caller of `start`, `send` and `close`, and also handed to
/// the registered [`TransportHandler::on_error`](crate::transport::TransportHandler::on_error).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("already started")]
    AlreadyStarted,
    #[error("not started")]
    NotStarted,
    #[error("not connected")]
    NotConnected,
    #[error("stream closed")]
    StreamClosed,
    #[error("transport closed")]
    Closed,
    #[cfg(feature = "client")]
    #[cfg_attr(docsrs, doc(cfg(feature = "client")))]
    #[error("SSE error: {0}")]
    Sse(#[from] sse_stream::Error),
    #[error("Client error: {0}")]
    Client(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("unexpected http status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("Unexpected content type: {0:?}")]
    UnexpectedContentType(Option<String>),
    #[error("unexpected end of stream")]
    UnexpectedEndOfStream,
    #[error("SSE error event: {0}")]
    ErrorEvent(String),
    #[error("endpoint event without data")]
    EmptyEndpoint,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("timed out after {duration:?} while {context}")]
    Timeout {
        context: Cow<'static, str>,
        duration: Duration,
    },
    #[error("Tokio join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl TransportError {
    pub fn timeout(context: impl Into<Cow<'static, str>>, duration: Duration) -> Self {
        TransportError::Timeout {
            context: context.into(),
            duration,
        }
    }

    /// Whether the transport can no longer carry traffic after this error.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportError::StreamClosed
                | TransportError::Closed
                | TransportError::ErrorEvent(_)
                | TransportError::EmptyEndpoint
                | TransportError::UnexpectedEndOfStream
        )
    }
}

#[cfg(feature = "client")]
impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Client(Box::new(e))
    }
}

/// An inbound message referenced a session that does not exist (or no longer exists).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("session not found: {0}")]
pub struct SessionNotFound(pub std::sync::Arc<str>);

/// Why an inbound POST could not be delivered to its session.
#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error(transparent)]
    SessionNotFound(#[from] SessionNotFound),
    #[error("invalid message: {0}")]
    Decode(#[from] DecodeError),
    #[error("session {0} is closed")]
    SessionClosed(std::sync::Arc<str>),
}

/// A required setting is missing or invalid. Always reported before any
/// transport is opened.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid url for `{name}`: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported url scheme `{scheme}` for `{name}`, expected http or https")]
    UnsupportedScheme { name: &'static str, scheme: String },
    #[error("invalid path `{path}` for `{name}`: {reason}")]
    InvalidPath {
        name: &'static str,
        path: String,
        reason: &'static str,
    },
}

impl ConfigurationError {
    /// Parse `value` as an absolute http(s) url.
    pub(crate) fn check_http_url(name: &'static str, value: &str) -> Result<url::Url, Self> {
        if value.trim().is_empty() {
            return Err(ConfigurationError::Missing(name));
        }
        let url = url::Url::parse(value)
            .map_err(|source| ConfigurationError::InvalidUrl { name, source })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(ConfigurationError::UnsupportedScheme {
                name,
                scheme: scheme.to_owned(),
            }),
        }
    }

    pub(crate) fn check_path(name: &'static str, path: &str) -> Result<(), Self> {
        let reason = if path.is_empty() {
            "must not be empty"
        } else if !path.starts_with('/') {
            "must start with `/`"
        } else if path.contains('?') || path.contains('#') {
            "must not contain a query or fragment"
        } else {
            return Ok(());
        };
        Err(ConfigurationError::InvalidPath {
            name,
            path: path.to_owned(),
            reason,
        })
    }
}

/// This is an unified error type for the errors could be returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    SessionNotFound(#[from] SessionNotFound),
    #[error("Inbound message error: {0}")]
    Inbound(#[from] InboundError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Service error: {0}")]
    Service(#[from] crate::service::ServiceError),
    #[cfg(feature = "client")]
    #[error("Client initialization error: {0}")]
    ClientInitialize(#[from] crate::service::ClientInitializeError),
    #[cfg(feature = "server")]
    #[error("Server initialization error: {0}")]
    ServerInitialize(#[from] crate::service::ServerInitializeError),
    #[cfg(feature = "client")]
    #[error("Connection error: {0}")]
    Connection(#[from] crate::connection::ConnectionError),
    #[error("Runtime error: {0}")]
    Runtime(#[from] tokio::task::JoinError),
}
