//! JSON-RPC session layer on top of a [`Transport`].
//!
//! A running service owns one task that reads everything the transport
//! delivers, routes responses back to the [`Peer`] request that is waiting
//! for them and spawns one task per inbound request. All outbound traffic is
//! written by that task, so frames on one transport are never interleaved.
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex, OnceLock, PoisonError,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    error::TransportError,
    model::{
        ErrorData, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
        RequestId, method,
    },
    transport::{Transport, TransportHandler},
};

#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
mod client;
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub use client::*;

#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
mod server;
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub use server::*;

/// Errors of a single request or notification sent through a [`Peer`].
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Mcp error: {0}")]
    McpError(ErrorData),
    #[error("Transport send error: {0}")]
    Transport(#[from] TransportError),
    #[error("Transport closed")]
    TransportClosed,
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(#[source] serde_json::Error),
    #[error("request timeout after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },
    #[error("capability `{0}` is not supported by the peer")]
    CapabilityNotSupported(&'static str),
    #[error("request cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Upper bound for one request/response round trip. `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl ServiceConfig {
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Self::DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

/// What a running service does with traffic initiated by the other side.
pub trait Service: Send + Sync + 'static {
    fn handle_request(
        &self,
        request: JsonRpcRequest,
        context: RequestContext,
    ) -> impl Future<Output = Result<Value, ErrorData>> + Send + '_;

    fn handle_notification(
        &self,
        notification: JsonRpcNotification,
        context: NotificationContext,
    ) -> impl Future<Output = ()> + Send + '_ {
        let _ = context;
        tracing::debug!(method = %notification.method, "unhandled notification");
        std::future::ready(())
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: RequestId,
    /// Cancelled when the peer sends `notifications/cancelled` for this id,
    /// or when the service stops.
    pub ct: CancellationToken,
    pub peer: Peer,
}

#[derive(Debug, Clone)]
pub struct NotificationContext {
    pub peer: Peer,
}

/// Whatever the other side announced during initialization.
#[derive(Debug, Clone)]
pub enum PeerInfo {
    #[cfg(feature = "client")]
    Server(crate::model::ServerInfo),
    #[cfg(feature = "server")]
    Client(crate::model::ClientInfo),
}

type Responder = oneshot::Sender<Result<Value, ErrorData>>;

#[derive(Debug)]
pub(crate) struct SinkMessage {
    message: JsonRpcMessage,
    responder: oneshot::Sender<Result<(), TransportError>>,
}

#[derive(Debug)]
struct PeerInner {
    sink: mpsc::Sender<SinkMessage>,
    pending: StdMutex<HashMap<RequestId, Responder>>,
    next_id: AtomicI64,
    request_timeout: Option<Duration>,
    info: OnceLock<PeerInfo>,
}

/// Handle to the other side of a running service. Cheap to clone.
///
/// Request ids are allocated from a per-session counter and never reused.
#[derive(Debug, Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl Peer {
    const SINK_CAPACITY: usize = 64;

    fn new(config: &ServiceConfig) -> (Self, mpsc::Receiver<SinkMessage>) {
        let (sink, sink_rx) = mpsc::channel(Self::SINK_CAPACITY);
        let peer = Self {
            inner: Arc::new(PeerInner {
                sink,
                pending: StdMutex::new(HashMap::new()),
                next_id: AtomicI64::new(0),
                request_timeout: config.request_timeout,
                info: OnceLock::new(),
            }),
        };
        (peer, sink_rx)
    }

    /// A peer with no running service behind it, for exercising handlers.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<SinkMessage>) {
        Self::new(&ServiceConfig::default())
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, Responder>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_info(&self, info: PeerInfo) {
        if self.inner.info.set(info).is_err() {
            tracing::warn!("peer info already set");
        }
    }

    pub fn peer_info(&self) -> Option<&PeerInfo> {
        self.inner.info.get()
    }

    pub fn is_transport_closed(&self) -> bool {
        self.inner.sink.is_closed()
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), ServiceError> {
        let (responder, rx) = oneshot::channel();
        self.inner
            .sink
            .send(SinkMessage { message, responder })
            .await
            .map_err(|_| ServiceError::TransportClosed)?;
        rx.await.map_err(|_| ServiceError::TransportClosed)??;
        Ok(())
    }

    pub async fn send_notification(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<(), ServiceError> {
        self.send(JsonRpcMessage::notification(method, params)).await
    }

    /// Send a request and wait for the matching response.
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<Value, ServiceError> {
        let id = self.next_request_id();
        let (responder, rx) = oneshot::channel();
        self.pending().insert(id.clone(), responder);
        if let Err(e) = self
            .send(JsonRpcMessage::request(id.clone(), method, params))
            .await
        {
            self.pending().remove(&id);
            return Err(e);
        }
        let response = match self.inner.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(response) => response,
                Err(_) => {
                    self.pending().remove(&id);
                    let cancel = serde_json::json!({
                        "requestId": id,
                        "reason": "request timeout",
                    });
                    if let Err(e) = self
                        .send_notification(method::NOTIFICATION_CANCELLED, Some(cancel))
                        .await
                    {
                        tracing::debug!(error = %e, "failed to send cancellation");
                    }
                    return Err(ServiceError::Timeout { timeout });
                }
            },
            None => rx.await,
        };
        response
            .map_err(|_| ServiceError::TransportClosed)?
            .map_err(ServiceError::McpError)
    }

    /// [`Peer::send_request`] with typed params and result.
    pub async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R, ServiceError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = params
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ServiceError::Transport(TransportError::Encode(e)))?;
        let result = self.send_request(method, params).await?;
        serde_json::from_value(result).map_err(ServiceError::UnexpectedResponse)
    }

    fn resolve(&self, response: JsonRpcResponse) {
        let id = response.id.clone();
        match self.pending().remove(&id) {
            Some(responder) => {
                let _ = responder.send(response.into_result());
            }
            None => tracing::warn!(%id, "response for unknown request"),
        }
    }

    /// Fail everything still waiting. Dropping the responders wakes the
    /// waiters with `TransportClosed`.
    fn fail_pending(&self) {
        let pending = std::mem::take(&mut *self.pending());
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "failing pending requests");
        }
    }
}

#[derive(Debug)]
pub(crate) enum TransportEvent {
    Message(JsonRpcMessage),
    Closed,
}

/// Forwards transport callbacks into the service task.
struct ChannelHandler {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportHandler for ChannelHandler {
    fn on_message(&self, message: JsonRpcMessage) {
        let _ = self.tx.send(TransportEvent::Message(message));
    }
    fn on_error(&self, error: &TransportError) {
        tracing::warn!(%error, "transport error");
    }
    fn on_close(&self) {
        let _ = self.tx.send(TransportEvent::Closed);
    }
}

/// A started transport plus the channel its callbacks feed. Used for the
/// initialization handshake before the service task takes over.
pub(crate) struct Connection<T> {
    transport: Arc<T>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl<T: Transport> Connection<T> {
    pub(crate) async fn open(transport: T) -> Result<Self, TransportError> {
        let (tx, events) = mpsc::unbounded_channel();
        let transport = Arc::new(transport);
        transport.set_handler(Arc::new(ChannelHandler { tx }));
        transport.start().await?;
        Ok(Self { transport, events })
    }

    pub(crate) async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        self.transport.send(message).await
    }

    /// The next message, or `None` once the transport closed.
    pub(crate) async fn next_message(&mut self) -> Option<JsonRpcMessage> {
        match self.events.recv().await? {
            TransportEvent::Message(message) => Some(message),
            TransportEvent::Closed => None,
        }
    }

    pub(crate) async fn close(&self) {
        if let Err(e) = self.transport.close().await {
            tracing::debug!(error = %e, "error while closing transport");
        }
    }
}

#[derive(Debug)]
pub enum QuitReason {
    Cancelled,
    Closed,
}

/// A service bound to a transport. Dereferences to its [`Peer`].
#[derive(Debug)]
pub struct RunningService<S: Service> {
    service: Arc<S>,
    peer: Peer,
    ct: CancellationToken,
    done: CancellationToken,
    handle: Mutex<Option<tokio::task::JoinHandle<QuitReason>>>,
}

impl<S: Service> std::ops::Deref for RunningService<S> {
    type Target = Peer;

    fn deref(&self) -> &Self::Target {
        &self.peer
    }
}

impl<S: Service> RunningService<S> {
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn service(&self) -> &S {
        self.service.as_ref()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.ct.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves once the service task has stopped, for any reason.
    pub async fn waiting(&self) {
        self.done.cancelled().await
    }

    /// Stop the service task and close the transport.
    pub async fn close(&self) -> Result<QuitReason, tokio::task::JoinError> {
        self.ct.cancel();
        let handle = self.handle.lock().await.take();
        match handle {
            Some(handle) => handle.await,
            None => Ok(QuitReason::Closed),
        }
    }
}

fn spawn_service<S: Service, T: Transport>(
    service: S,
    connection: Connection<T>,
    peer: Peer,
    sink_rx: mpsc::Receiver<SinkMessage>,
) -> RunningService<S> {
    let service = Arc::new(service);
    let ct = CancellationToken::new();
    let done = CancellationToken::new();
    let handle = tokio::spawn(
        serve_loop(
            service.clone(),
            connection,
            peer.clone(),
            sink_rx,
            ct.clone(),
            done.clone(),
        )
        .instrument(tracing::debug_span!("service")),
    );
    RunningService {
        service,
        peer,
        ct,
        done,
        handle: Mutex::new(Some(handle)),
    }
}

struct HandlerDone {
    id: RequestId,
    response: Option<JsonRpcMessage>,
}

async fn serve_loop<S: Service, T: Transport>(
    service: Arc<S>,
    mut connection: Connection<T>,
    peer: Peer,
    mut sink_rx: mpsc::Receiver<SinkMessage>,
    ct: CancellationToken,
    done: CancellationToken,
) -> QuitReason {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<HandlerDone>();
    let mut in_flight: HashMap<RequestId, CancellationToken> = HashMap::new();
    let quit = loop {
        tokio::select! {
            biased;
            _ = ct.cancelled() => break QuitReason::Cancelled,
            Some(finished) = done_rx.recv() => {
                in_flight.remove(&finished.id);
                if let Some(response) = finished.response {
                    if let Err(e) = connection.send(response).await {
                        tracing::error!(id = %finished.id, error = %e, "failed to send response");
                    }
                }
            }
            Some(SinkMessage { message, responder }) = sink_rx.recv() => {
                let _ = responder.send(connection.send(message).await);
            }
            message = connection.next_message() => {
                let Some(message) = message else {
                    break QuitReason::Closed;
                };
                match message {
                    JsonRpcMessage::Request(request) => {
                        let id = request.id.clone();
                        let request_ct = ct.child_token();
                        in_flight.insert(id.clone(), request_ct.clone());
                        let context = RequestContext {
                            id: id.clone(),
                            ct: request_ct.clone(),
                            peer: peer.clone(),
                        };
                        let service = service.clone();
                        let done_tx = done_tx.clone();
                        let span = tracing::debug_span!("request", %id, method = %request.method);
                        tokio::spawn(async move {
                            let response = tokio::select! {
                                result = service.handle_request(request, context) => {
                                    Some(match result {
                                        Ok(result) => JsonRpcMessage::response(id.clone(), result),
                                        Err(error) => JsonRpcMessage::error(id.clone(), error),
                                    })
                                }
                                _ = request_ct.cancelled() => None,
                            };
                            let _ = done_tx.send(HandlerDone { id, response });
                        }.instrument(span));
                    }
                    JsonRpcMessage::Response(response) => peer.resolve(response),
                    JsonRpcMessage::Notification(notification) => {
                        if notification.method == method::NOTIFICATION_CANCELLED {
                            let request_id = notification
                                .params
                                .as_ref()
                                .and_then(|params| params.get("requestId"))
                                .and_then(|id| {
                                    serde_json::from_value::<RequestId>(id.clone()).ok()
                                });
                            if let Some(request_ct) = request_id.and_then(|id| in_flight.get(&id)) {
                                request_ct.cancel();
                            }
                            continue;
                        }
                        let service = service.clone();
                        let context = NotificationContext { peer: peer.clone() };
                        tokio::spawn(async move {
                            service.handle_notification(notification, context).await;
                        });
                    }
                }
            }
        }
    };
    tracing::debug!(?quit, "service loop stopped");
    for request_ct in in_flight.values() {
        request_ct.cancel();
    }
    drop(sink_rx);
    peer.fail_pending();
    connection.close().await;
    done.cancel();
    quit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_ids_are_monotonic() {
        let (peer, _sink_rx) = Peer::new(&ServiceConfig::default());
        assert_eq!(peer.next_request_id(), RequestId::Number(0));
        assert_eq!(peer.next_request_id(), RequestId::Number(1));
        assert_eq!(peer.next_request_id(), RequestId::Number(2));
    }

    #[tokio::test]
    async fn test_send_request_resolves_by_id() {
        let (peer, mut sink_rx) = Peer::new(&ServiceConfig::default());
        let waiter = {
            let peer = peer.clone();
            tokio::spawn(async move { peer.send_request("tools/list", None).await })
        };
        let SinkMessage { message, responder } = sink_rx.recv().await.unwrap();
        responder.send(Ok(())).unwrap();
        let id = message.id().cloned().unwrap();
        peer.resolve(JsonRpcResponse {
            jsonrpc: Default::default(),
            id,
            outcome: crate::model::ResponseOutcome::Result(serde_json::json!({"tools": []})),
        });
        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result, serde_json::json!({"tools": []}));
    }

    #[tokio::test]
    async fn test_pending_requests_fail_when_closed() {
        let (peer, mut sink_rx) = Peer::new(&ServiceConfig::default());
        let waiter = {
            let peer = peer.clone();
            tokio::spawn(async move { peer.send_request("ping", None).await })
        };
        let SinkMessage { responder, .. } = sink_rx.recv().await.unwrap();
        responder.send(Ok(())).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        peer.fail_pending();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(ServiceError::TransportClosed)
        ));
        drop(sink_rx);
        assert!(matches!(
            peer.send_request("ping", None).await,
            Err(ServiceError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let config = ServiceConfig {
            request_timeout: Some(Duration::from_millis(50)),
        };
        let (peer, mut sink_rx) = Peer::new(&config);
        let acknowledge = tokio::spawn(async move {
            let mut methods = Vec::new();
            while let Some(SinkMessage { message, responder }) = sink_rx.recv().await {
                methods.push(message.method().map(str::to_owned));
                let _ = responder.send(Ok(()));
                if methods.len() == 2 {
                    break;
                }
            }
            methods
        });
        assert!(matches!(
            peer.send_request("tools/call", None).await,
            Err(ServiceError::Timeout { .. })
        ));
        let methods = acknowledge.await.unwrap();
        assert_eq!(
            methods,
            vec![
                Some("tools/call".to_owned()),
                Some(method::NOTIFICATION_CANCELLED.to_owned())
            ]
        );
    }
}
