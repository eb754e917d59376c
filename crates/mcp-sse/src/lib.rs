#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]
#![doc = include_str!("../README.md")]

pub mod error;
pub use error::{ConfigurationError, Error, TransportError};

/// Basic data types of the JSON-RPC messages MCP exchanges
pub mod model;
pub use model::{ErrorData, JsonRpcMessage};

pub mod service;
pub use service::{Peer, RunningService, Service, ServiceConfig, ServiceError};
#[cfg(feature = "client")]
pub use service::{ClientHandler, McpClient, serve_client};
#[cfg(feature = "server")]
pub use service::{Server, serve_server};

pub mod transport;
pub use transport::{Transport, TransportHandler};

#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod handler;

#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod connection;

// re-export
#[cfg(feature = "server")]
pub use schemars;
