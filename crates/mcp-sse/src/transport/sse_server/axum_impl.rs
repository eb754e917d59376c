use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Extension, Router,
    extract::{NestedPath, Query, State},
    http::{StatusCode, request::Parts},
    response::{
        Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{
    common::{DEFAULT_AUTO_PING_INTERVAL, SseServerConfig},
    session::{SessionChannels, SessionRegistry},
    transport::SseServerTransport,
};
use crate::{
    error::{Error, InboundError},
    service::Service,
    transport::common::event,
};

#[derive(Clone)]
struct App {
    registry: SessionRegistry,
    transport_tx: tokio::sync::mpsc::UnboundedSender<SseServerTransport>,
    base_url: Arc<str>,
    post_path: Arc<str>,
    sse_ping_interval: Duration,
    ct: CancellationToken,
}

impl App {
    pub fn new(
        config: &SseServerConfig,
        registry: SessionRegistry,
    ) -> (
        Self,
        tokio::sync::mpsc::UnboundedReceiver<SseServerTransport>,
    ) {
        let (transport_tx, transport_rx) = tokio::sync::mpsc::unbounded_channel();
        (
            Self {
                registry,
                transport_tx,
                base_url: config.base_url().into(),
                post_path: config.post_path.as_str().into(),
                sse_ping_interval: config.sse_keep_alive.unwrap_or(DEFAULT_AUTO_PING_INTERVAL),
                ct: config.ct.clone(),
            },
            transport_rx,
        )
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostEventQuery {
    pub session_id: String,
}

fn inbound_status(error: &InboundError) -> (StatusCode, String) {
    match error {
        InboundError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "Session not found".into()),
        InboundError::Decode(e) => (StatusCode::BAD_REQUEST, e.to_string()),
        InboundError::SessionClosed(_) => (StatusCode::GONE, error.to_string()),
    }
}

async fn post_event_handler(
    State(app): State<App>,
    Query(PostEventQuery { session_id }): Query<PostEventQuery>,
    body: String,
) -> Result<StatusCode, (StatusCode, String)> {
    tracing::debug!(session_id, %body, "new client message");
    match app.registry.handle_inbound(&session_id, &body).await {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(e) => {
            tracing::warn!(session_id, error = %e, "rejected client message");
            Err(inbound_status(&e))
        }
    }
}

async fn sse_handler(
    State(app): State<App>,
    nested_path: Option<Extension<NestedPath>>,
    parts: Parts,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response<String>> {
    let nested_path = nested_path.as_deref().map(NestedPath::as_str).unwrap_or("");
    let endpoint_base = format!("{}{nested_path}{}", app.base_url, app.post_path);
    let (
        session,
        SessionChannels {
            to_client_rx,
            from_client_rx,
        },
    ) = app.registry.create(&endpoint_base, app.ct.child_token());
    let session_id = session.id().clone();
    tracing::info!(%session_id, ?parts, "sse connection");

    let transport = SseServerTransport::new(session.clone(), app.registry.clone(), from_client_rx);
    if app.transport_tx.send(transport).is_err() {
        tracing::warn!("send transport out error");
        app.registry.remove(&session_id);
        session.close();
        let mut response =
            Response::new("fail to send out transport, it seems server is closed".to_string());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return Err(response);
    }

    let endpoint = Event::default()
        .event(event::ENDPOINT)
        .data(session.endpoint().as_ref());
    let stream = futures::stream::once(futures::future::ready(Ok::<_, Infallible>(endpoint)))
        .chain(
            ReceiverStream::new(to_client_rx)
                .map(|body| Ok::<_, Infallible>(Event::default().event(event::MESSAGE).data(body))),
        )
        .take_until(session.cancelled_owned());

    let to_client_tx = session.to_client_sender();
    let registry = app.registry.clone();
    tokio::spawn(
        async move {
            // the receiver is dropped together with the response stream
            to_client_tx.closed().await;
            registry.remove(session.id());
            session.close();
            tracing::debug!("closed session and cleaned up resources");
        }
        .instrument(tracing::info_span!("session", %session_id)),
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(app.sse_ping_interval)))
}

/// Axum based SSE server. Hands out one [`SseServerTransport`] per stream.
#[derive(Debug)]
pub struct SseServer {
    transport_rx: tokio::sync::mpsc::UnboundedReceiver<SseServerTransport>,
    registry: SessionRegistry,
    pub config: SseServerConfig,
}

impl SseServer {
    pub async fn serve(bind: SocketAddr) -> Result<Self, Error> {
        Self::serve_with_config(SseServerConfig::new(bind)).await
    }

    pub async fn serve_with_config(mut config: SseServerConfig) -> Result<Self, Error> {
        config.validate()?;
        let listener = tokio::net::TcpListener::bind(config.bind).await?;
        // port 0 resolves to the real port here
        config.bind = listener.local_addr()?;
        let (sse_server, service) = Self::new(config);
        let ct = sse_server.config.ct.child_token();
        let server = axum::serve(listener, service).with_graceful_shutdown(async move {
            ct.cancelled().await;
            tracing::info!("sse server cancelled");
        });
        tokio::spawn(
            async move {
                if let Err(e) = server.await {
                    tracing::error!(error = %e, "sse server shutdown with error");
                }
            }
            .instrument(tracing::info_span!("sse-server", bind_address = %sse_server.config.bind)),
        );
        tracing::info!(
            sse = %format!("{}{}", sse_server.config.base_url(), sse_server.config.sse_path),
            "sse server listening"
        );
        Ok(sse_server)
    }

    /// Build the router without binding. The caller serves it; endpoint urls
    /// are derived from `config.bind` or `config.public_base_url`.
    pub fn new(config: SseServerConfig) -> (SseServer, Router) {
        let registry = SessionRegistry::new();
        let (app, transport_rx) = App::new(&config, registry.clone());
        let router = Router::new()
            .route(&config.sse_path, get(sse_handler))
            .route(&config.post_path, post(post_event_handler))
            .with_state(app);

        let server = SseServer {
            transport_rx,
            registry,
            config,
        };

        (server, router)
    }

    /// Run a fresh service produced by `service_provider` on every session.
    pub fn with_service<S, F>(mut self, service_provider: F) -> CancellationToken
    where
        S: Service,
        F: Fn() -> S + Send + 'static,
    {
        let ct = self.config.ct.clone();
        tokio::spawn(async move {
            while let Some(transport) = self.next_transport().await {
                let service = service_provider();
                let ct = self.config.ct.child_token();
                let span = tracing::info_span!("session", session_id = %transport.session_id());
                tokio::spawn(
                    async move {
                        let running = match crate::service::serve_server(service, transport).await {
                            Ok(running) => running,
                            Err(e) => {
                                tracing::warn!(error = %e, "session initialization failed");
                                return;
                            }
                        };
                        tokio::select! {
                            _ = ct.cancelled() => {
                                if let Err(e) = running.close().await {
                                    tracing::debug!(error = %e, "error while closing session");
                                }
                            }
                            _ = running.waiting() => {}
                        }
                    }
                    .instrument(span),
                );
            }
        });
        ct
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn cancel(&self) {
        self.config.ct.cancel();
    }

    pub async fn next_transport(&mut self) -> Option<SseServerTransport> {
        tokio::select! {
            biased;
            transport = self.transport_rx.recv() => transport,
            _ = self.config.ct.cancelled() => None,
        }
    }
}

impl Stream for SseServer {
    type Item = SseServerTransport;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.transport_rx.poll_recv(cx)
    }
}
