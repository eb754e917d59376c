#![allow(dead_code)]
pub mod calculator;

use std::{sync::Arc, time::Duration};

use futures::{StreamExt, stream::BoxStream};
use mcp_sse::{
    TransportError, TransportHandler,
    model::JsonRpcMessage,
    transport::{SseServer, SseServerConfig},
};
use sse_stream::{Error as SseError, Sse, SseStream};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

pub fn local_config() -> SseServerConfig {
    SseServerConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        // frequent pings let the server notice dropped clients quickly
        sse_keep_alive: Some(Duration::from_millis(500)),
        ..Default::default()
    }
}

/// Bind an SSE server on a free port and return it with its stream url.
pub async fn serve() -> anyhow::Result<(SseServer, String)> {
    let server = SseServer::serve_with_config(local_config()).await?;
    let url = format!("http://{}{}", server.config.bind, server.config.sse_path);
    Ok((server, url))
}

/// What a transport handler saw, in order.
#[derive(Debug)]
pub enum Observed {
    Message(JsonRpcMessage),
    Error(String),
    Close,
}

pub struct Recorder {
    tx: mpsc::UnboundedSender<Observed>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Observed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl TransportHandler for Recorder {
    fn on_message(&self, message: JsonRpcMessage) {
        let _ = self.tx.send(Observed::Message(message));
    }
    fn on_error(&self, error: &TransportError) {
        let _ = self.tx.send(Observed::Error(error.to_string()));
    }
    fn on_close(&self) {
        let _ = self.tx.send(Observed::Close);
    }
}

pub async fn next_observed(rx: &mut mpsc::UnboundedReceiver<Observed>) -> anyhow::Result<Observed> {
    tokio::time::timeout(WAIT, rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("handler dropped"))
}

pub async fn next_message(
    rx: &mut mpsc::UnboundedReceiver<Observed>,
) -> anyhow::Result<JsonRpcMessage> {
    loop {
        match next_observed(rx).await? {
            Observed::Message(message) => return Ok(message),
            Observed::Error(error) => tracing::debug!(%error, "skipping error"),
            Observed::Close => anyhow::bail!("closed while waiting for a message"),
        }
    }
}

/// Wait for `on_close`, skipping whatever was reported before it.
pub async fn wait_closed(rx: &mut mpsc::UnboundedReceiver<Observed>) -> anyhow::Result<()> {
    loop {
        if let Observed::Close = next_observed(rx).await? {
            return Ok(());
        }
    }
}

/// A bare SSE reader, for looking at the wire without the client transport.
pub struct RawSse {
    stream: BoxStream<'static, Result<Sse, SseError>>,
    pub endpoint: String,
}

impl RawSse {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let response = reqwest::Client::new()
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;
        let mut raw = Self {
            stream: SseStream::from_bytes_stream(response.bytes_stream()).boxed(),
            endpoint: String::new(),
        };
        let first = raw.next_event().await?;
        anyhow::ensure!(
            first.event.as_deref() == Some("endpoint"),
            "first event is not the endpoint: {first:?}"
        );
        raw.endpoint = first.data.unwrap_or_default();
        Ok(raw)
    }

    /// The next event that carries data; keep-alive comments are skipped.
    pub async fn next_event(&mut self) -> anyhow::Result<Sse> {
        loop {
            let event = tokio::time::timeout(WAIT, self.stream.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("stream ended"))??;
            if event.data.is_some() {
                return Ok(event);
            }
        }
    }

    pub async fn next_message(&mut self) -> anyhow::Result<JsonRpcMessage> {
        let event = self.next_event().await?;
        anyhow::ensure!(event.event.as_deref() == Some("message"), "unexpected event {event:?}");
        Ok(JsonRpcMessage::decode(&event.data.unwrap_or_default())?)
    }

    /// `None` once the server ended the stream.
    pub async fn next_raw(&mut self) -> anyhow::Result<Option<Result<Sse, SseError>>> {
        Ok(tokio::time::timeout(WAIT, self.stream.next()).await?)
    }

    pub fn session_id(&self) -> anyhow::Result<String> {
        let url = url::Url::parse(&self.endpoint)?;
        url.query_pairs()
            .find(|(key, _)| key == "sessionId")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| anyhow::anyhow!("endpoint without sessionId: {}", self.endpoint))
    }

    pub async fn post(&self, body: &str) -> anyhow::Result<reqwest::StatusCode> {
        post(&self.endpoint, body).await
    }
}

pub async fn post(url: &str, body: &str) -> anyhow::Result<reqwest::StatusCode> {
    let response = reqwest::Client::new()
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .send()
        .await?;
    Ok(response.status())
}

/// Poll `check` until it holds or [`WAIT`] passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
