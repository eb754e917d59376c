//! # Transport
//! A transport turns a raw stream/POST pair into a `start` / `send` / `close`
//! contract and reports what it receives through a [`TransportHandler`].
//!
//! Transports carry [`JsonRpcMessage`]s and never interpret method names or
//! parameters; that is the job of [`crate::service`].
//!
//! | Transport | Side | Feature |
//! | --------- | ---- | ------- |
//! | [`SseClientTransport`] | client | `client` |
//! | [`SseServerTransport`] | server | `server` |
//!
//! ## Lifecycle
//! 1. Register a handler with [`Transport::set_handler`].
//! 2. [`Transport::start`] exactly once. A second call fails with
//!    [`TransportError::AlreadyStarted`].
//! 3. [`Transport::send`] any number of times.
//! 4. [`Transport::close`]. After it returns no callback of the handler runs
//!    again, and [`TransportHandler::on_close`] has run exactly once.
use std::sync::{Arc, PoisonError, RwLock};

use crate::{error::TransportError, model::JsonRpcMessage};

pub mod common;

#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod sse_client;
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub use sse_client::{SseClient, SseClientConfig, SseClientTransport};

#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod sse_server;
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub use sse_server::{SessionRegistry, SseServer, SseServerConfig, SseServerTransport};

/// Receives what a transport observes. Every method has a no-op default.
///
/// Callbacks run on the transport's background task; they should hand work
/// off rather than block.
pub trait TransportHandler: Send + Sync + 'static {
    fn on_message(&self, message: JsonRpcMessage) {
        tracing::trace!(?message, "message dropped, no handler interested");
    }
    fn on_error(&self, error: &TransportError) {
        tracing::debug!(%error, "transport error");
    }
    fn on_close(&self) {}
}

/// The contract the RPC layer consumes.
pub trait Transport: Send + Sync + 'static {
    /// Register the handler. A later call replaces the earlier one.
    fn set_handler(&self, handler: Arc<dyn TransportHandler>);

    fn start(&self) -> impl Future<Output = Result<(), TransportError>> + Send + '_;

    fn send(
        &self,
        message: JsonRpcMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send + '_;

    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send + '_;
}

struct SlotState {
    handler: Option<Arc<dyn TransportHandler>>,
    sealed: bool,
}

/// Holds the registered handler and guarantees that nothing is delivered
/// once the slot is sealed. Sealing waits for in-flight callbacks.
pub(crate) struct HandlerSlot {
    state: RwLock<SlotState>,
}

impl Default for HandlerSlot {
    fn default() -> Self {
        Self {
            state: RwLock::new(SlotState {
                handler: None,
                sealed: false,
            }),
        }
    }
}

impl std::fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("HandlerSlot")
            .field("registered", &state.handler.is_some())
            .field("sealed", &state.sealed)
            .finish()
    }
}

impl HandlerSlot {
    pub(crate) fn set(&self, handler: Arc<dyn TransportHandler>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.sealed {
            tracing::debug!("handler registered on a closed transport");
        }
        state.handler = Some(handler);
    }

    fn with_handler(&self, f: impl FnOnce(&dyn TransportHandler)) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.sealed {
            return;
        }
        if let Some(handler) = &state.handler {
            f(handler.as_ref());
        }
    }

    pub(crate) fn message(&self, message: JsonRpcMessage) {
        self.with_handler(|handler| handler.on_message(message));
    }

    pub(crate) fn error(&self, error: &TransportError) {
        self.with_handler(|handler| handler.on_error(error));
    }

    /// Seal the slot and run `on_close`. Only the first call has any effect.
    pub(crate) fn close(&self) {
        let handler = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.sealed {
                return;
            }
            state.sealed = true;
            state.handler.clone()
        };
        if let Some(handler) = handler {
            handler.on_close();
        }
    }

    pub(crate) fn is_sealed(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sealed
    }
}
