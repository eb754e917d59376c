//! Client side of the SSE transport.
//!
//! reference: https://html.spec.whatwg.org/multipage/server-sent-events.html
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::StreamExt;
use sse_stream::{Error as SseError, Sse};
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{
    HandlerSlot, Transport, TransportHandler,
    common::{endpoint::EndpointCell, event, sse::BoxedSseResponse},
};
use crate::{
    error::{ConfigurationError, Error, TransportError},
    model::JsonRpcMessage,
};

/// The HTTP side of the client transport: one long-lived GET for the event
/// stream and one POST per outbound message.
pub trait SseClient: Clone + Send + Sync + 'static {
    fn post_message(
        &self,
        uri: Arc<str>,
        body: String,
    ) -> impl Future<Output = Result<(), TransportError>> + Send + '_;
    fn get_stream(
        &self,
        uri: Arc<str>,
    ) -> impl Future<Output = Result<BoxedSseResponse, TransportError>> + Send + '_;
}

#[derive(Debug, Clone)]
pub struct SseClientConfig {
    /// The SSE stream url, for example `http://127.0.0.1:3001/sse`.
    pub uri: Arc<str>,
    /// How long `start` waits for the `endpoint` event. `None` waits forever.
    pub handshake_timeout: Option<Duration>,
    /// How long a single POST may take. `None` waits forever.
    pub post_timeout: Option<Duration>,
    /// Capacity of the queue between the stream reader and the dispatcher.
    pub channel_capacity: usize,
}

impl SseClientConfig {
    pub const DEFAULT_URI: &'static str = "http://127.0.0.1:3001/sse";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

    pub fn new(uri: impl Into<Arc<str>>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ConfigurationError::check_http_url("uri", &self.uri)?;
        if self.channel_capacity == 0 {
            return Err(ConfigurationError::Missing("channel_capacity"));
        }
        Ok(())
    }
}

impl Default for SseClientConfig {
    fn default() -> Self {
        Self {
            uri: Self::DEFAULT_URI.into(),
            handshake_timeout: Some(Self::DEFAULT_TIMEOUT),
            post_timeout: Some(Self::DEFAULT_TIMEOUT),
            channel_capacity: Self::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// State shared between the transport and its listener tasks.
#[derive(Debug, Default)]
struct Shared {
    handler: HandlerSlot,
    endpoint: EndpointCell,
    /// Cancelled by `close` or when the stream terminates.
    ct: CancellationToken,
    closed_by_owner: AtomicBool,
}

impl Shared {
    fn closed_error(&self) -> TransportError {
        if self.closed_by_owner.load(Ordering::Acquire) {
            TransportError::Closed
        } else {
            TransportError::StreamClosed
        }
    }
}

#[derive(Debug)]
struct ListenerTasks {
    reader: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Client side of the SSE transport.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// use mcp_sse::transport::{SseClientTransport, Transport, TransportHandler};
/// # struct Printer;
/// # impl TransportHandler for Printer {}
/// # async fn demo() -> Result<(), mcp_sse::Error> {
/// let transport = SseClientTransport::new("http://127.0.0.1:3001/sse")?;
/// transport.set_handler(Arc::new(Printer));
/// transport.start().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SseClientTransport<C: SseClient = reqwest::Client> {
    client: C,
    config: SseClientConfig,
    started: AtomicBool,
    shared: Arc<Shared>,
    tasks: Mutex<Option<ListenerTasks>>,
}

impl SseClientTransport<reqwest::Client> {
    pub fn new(uri: impl Into<Arc<str>>) -> Result<Self, ConfigurationError> {
        Self::with_client(reqwest::Client::default(), SseClientConfig::new(uri))
    }

    /// Build a transport for `uri`, register `handler` and start it.
    pub async fn connect(
        uri: impl Into<Arc<str>>,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Self, Error> {
        let transport = Self::new(uri)?;
        transport.set_handler(handler);
        transport.start().await?;
        Ok(transport)
    }
}

impl<C: SseClient> SseClientTransport<C> {
    pub fn with_client(client: C, config: SseClientConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            client,
            config,
            started: AtomicBool::new(false),
            shared: Arc::new(Shared::default()),
            tasks: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SseClientConfig {
        &self.config
    }

    /// The POST url announced by the server, once the handshake completed.
    pub fn endpoint(&self) -> Option<Arc<str>> {
        self.shared.endpoint.get()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.ct.is_cancelled()
    }

    async fn handshake(
        &self,
        failure_rx: oneshot::Receiver<TransportError>,
    ) -> Result<Arc<str>, TransportError> {
        let shared = &self.shared;
        let wait = async {
            tokio::select! {
                biased;
                endpoint = shared.endpoint.resolved() => {
                    endpoint.ok_or(TransportError::StreamClosed)
                }
                failure = failure_rx => Err(failure.unwrap_or_else(|_| shared.closed_error())),
            }
        };
        match self.config.handshake_timeout {
            Some(duration) => tokio::time::timeout(duration, wait)
                .await
                .unwrap_or_else(|_| {
                    Err(TransportError::timeout(
                        "waiting for the endpoint event",
                        duration,
                    ))
                }),
            None => wait.await,
        }
    }

    async fn post(&self, endpoint: Arc<str>, body: String) -> Result<(), TransportError> {
        let post = self.client.post_message(endpoint, body);
        match self.config.post_timeout {
            Some(duration) => tokio::time::timeout(duration, post)
                .await
                .unwrap_or_else(|_| Err(TransportError::timeout("posting a message", duration))),
            None => post.await,
        }
    }
}

impl<C: SseClient> Transport for SseClientTransport<C> {
    fn set_handler(&self, handler: Arc<dyn TransportHandler>) {
        self.shared.handler.set(handler);
    }

    async fn start(&self) -> Result<(), TransportError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TransportError::AlreadyStarted);
        }
        let span = tracing::info_span!("sse-client", uri = %self.config.uri);
        tracing::debug!(parent: &span, "opening event stream");
        let stream = match self.client.get_stream(self.config.uri.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(parent: &span, error = %e, "failed to open event stream");
                self.shared.handler.error(&e);
                self.shared.ct.cancel();
                return Err(e);
            }
        };
        if self.shared.ct.is_cancelled() {
            return Err(self.shared.closed_error());
        }

        let (event_tx, event_rx) = mpsc::channel(self.config.channel_capacity);
        let (failure_tx, failure_rx) = oneshot::channel();
        let reader = tokio::spawn(
            read_events(stream, event_tx, self.shared.ct.clone()).instrument(span.clone()),
        );
        let dispatcher = tokio::spawn(
            dispatch_events(event_rx, self.shared.clone(), failure_tx).instrument(span.clone()),
        );
        *self.tasks.lock().await = Some(ListenerTasks { reader, dispatcher });

        match self.handshake(failure_rx).await {
            Ok(endpoint) => {
                tracing::info!(parent: &span, %endpoint, "sse client transport connected");
                Ok(())
            }
            Err(e) => {
                if matches!(e, TransportError::Timeout { .. }) {
                    tracing::error!(parent: &span, error = %e, "handshake timed out");
                    self.shared.handler.error(&e);
                    self.shared.ct.cancel();
                    self.shared.handler.close();
                }
                Err(e)
            }
        }
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        let Some(endpoint) = self.shared.endpoint.get() else {
            return Err(TransportError::NotConnected);
        };
        if self.shared.ct.is_cancelled() {
            return Err(self.shared.closed_error());
        }
        let body = match message.encode() {
            Ok(body) => body,
            Err(e) => {
                let e = TransportError::Encode(e);
                self.shared.handler.error(&e);
                return Err(e);
            }
        };
        tracing::trace!(%endpoint, %body, "post message");
        let result = tokio::select! {
            biased;
            _ = self.shared.ct.cancelled() => Err(self.shared.closed_error()),
            result = self.post(endpoint, body) => result,
        };
        if let Err(e) = &result {
            tracing::warn!(error = %e, "failed to send message");
            self.shared.handler.error(e);
        }
        result
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(TransportError::NotStarted);
        }
        self.shared.closed_by_owner.store(true, Ordering::Release);
        self.shared.ct.cancel();
        let tasks = self.tasks.lock().await.take();
        let mut result = Ok(());
        if let Some(ListenerTasks { reader, dispatcher }) = tasks {
            for handle in [reader, dispatcher] {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        tracing::error!(error = %e, "listener task panicked");
                        result = Err(TransportError::Join(e));
                    }
                }
            }
        }
        self.shared.handler.close();
        tracing::debug!("sse client transport closed");
        result
    }
}

async fn read_events(
    mut stream: BoxedSseResponse,
    tx: mpsc::Sender<Result<Sse, SseError>>,
    ct: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = ct.cancelled() => break,
            next = stream.next() => next,
        };
        let Some(item) = next else {
            tracing::debug!("event stream ended");
            break;
        };
        let sent = tokio::select! {
            biased;
            _ = ct.cancelled() => break,
            sent = tx.send(item) => sent,
        };
        if sent.is_err() {
            break;
        }
    }
}

async fn dispatch_events(
    mut rx: mpsc::Receiver<Result<Sse, SseError>>,
    shared: Arc<Shared>,
    failure_tx: oneshot::Sender<TransportError>,
) {
    let reason = loop {
        let item = tokio::select! {
            biased;
            _ = shared.ct.cancelled() => return,
            item = rx.recv() => item,
        };
        let sse = match item {
            None => break TransportError::UnexpectedEndOfStream,
            Some(Err(e)) => break TransportError::Sse(e),
            Some(Ok(sse)) => sse,
        };
        match sse.event.as_deref() {
            Some(event::ERROR) => {
                break TransportError::ErrorEvent(sse.data.unwrap_or_default());
            }
            Some(event::OPEN) => tracing::debug!("event stream opened"),
            Some(event::ENDPOINT) => {
                let Some(endpoint) = sse.data else {
                    break TransportError::EmptyEndpoint;
                };
                if shared.endpoint.resolve(endpoint.as_str().into()) {
                    tracing::debug!(%endpoint, "endpoint received");
                } else {
                    tracing::warn!(%endpoint, "ignoring repeated endpoint event");
                }
            }
            _ => {
                let Some(data) = sse.data else {
                    continue;
                };
                match JsonRpcMessage::decode(&data) {
                    Ok(message) => shared.handler.message(message),
                    Err(e) => {
                        tracing::warn!(error = %e, %data, "failed to decode message");
                        shared.handler.error(&TransportError::Decode(e));
                    }
                }
            }
        }
    };
    if shared.ct.is_cancelled() {
        return;
    }
    tracing::error!(error = %reason, "event stream terminated");
    shared.handler.error(&reason);
    shared.ct.cancel();
    if shared.endpoint.get().is_none() {
        let _ = failure_tx.send(reason);
    }
    shared.handler.close();
}
