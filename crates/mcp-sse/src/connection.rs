//! Long-lived client connections to an SSE server.
//!
//! [`ServerConnection`] owns at most one initialized client. Every operation
//! takes the same lock, so `close` never tears the transport down under a
//! call that is still running.
use std::{collections::HashMap, sync::Arc};

use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    error::ConfigurationError,
    model::{CallToolResult, JsonObject, ServerInfo, Tool},
    service::{ClientInitializeError, McpClient, ServiceError, serve_client},
    transport::{SseClientConfig, SseClientTransport},
};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("no connection named `{0}`")]
    UnknownConnection(String),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Initialize(#[from] ClientInitializeError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug)]
pub struct ServerConnection {
    config: SseClientConfig,
    http: reqwest::Client,
    client: Mutex<Option<McpClient>>,
}

impl ServerConnection {
    pub fn new(config: SseClientConfig) -> Self {
        Self::with_http_client(reqwest::Client::default(), config)
    }

    pub fn with_http_client(http: reqwest::Client, config: SseClientConfig) -> Self {
        Self {
            config,
            http,
            client: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SseClientConfig {
        &self.config
    }

    /// Open the SSE stream and run the initialize handshake.
    pub async fn connect(&self) -> Result<ServerInfo, ConnectionError> {
        let mut slot = self.client.lock().await;
        if slot.is_some() {
            return Err(ConnectionError::AlreadyConnected);
        }
        let transport = SseClientTransport::with_client(self.http.clone(), self.config.clone())?;
        let client = serve_client((), transport).await?;
        let info = client.server_info().clone();
        tracing::info!(uri = %self.config.uri, server = %info.server_info.name, "connected");
        *slot = Some(client);
        Ok(info)
    }

    pub async fn is_connected(&self) -> bool {
        self.client
            .lock()
            .await
            .as_ref()
            .is_some_and(|client| !client.is_closed())
    }

    pub async fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, ConnectionError> {
        let slot = self.client.lock().await;
        let client = slot.as_ref().ok_or(ConnectionError::NotConnected)?;
        Ok(client.call_tool(name.into(), arguments).await?)
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>, ConnectionError> {
        let slot = self.client.lock().await;
        let client = slot.as_ref().ok_or(ConnectionError::NotConnected)?;
        Ok(client.list_all_tools().await?)
    }

    /// Close the client if there is one. Closing twice is a no-op.
    pub async fn close(&self) {
        let Some(client) = self.client.lock().await.take() else {
            return;
        };
        match client.close().await {
            Ok(reason) => tracing::info!(uri = %self.config.uri, ?reason, "connection closed"),
            Err(e) => tracing::warn!(uri = %self.config.uri, error = %e, "connection task failed"),
        }
    }
}

/// Named connections, with a `"default"` entry for the common single server
/// setup.
///
/// The map lock only guards lookups and inserts. Calls run against a cloned
/// [`ServerConnection`], so a slow call on one connection never holds up
/// another.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: Mutex<HashMap<String, Arc<ServerConnection>>>,
}

impl ConnectionManager {
    pub const DEFAULT: &'static str = "default";

    pub fn new() -> Self {
        Self::default()
    }

    fn get(
        connections: &HashMap<String, Arc<ServerConnection>>,
        name: &str,
    ) -> Result<Arc<ServerConnection>, ConnectionError> {
        connections
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectionError::UnknownConnection(name.to_string()))
    }

    /// Connect `name`; an existing live connection under that name is an
    /// error, a closed one is replaced.
    pub async fn connect(
        &self,
        name: impl Into<String>,
        config: SseClientConfig,
    ) -> Result<ServerInfo, ConnectionError> {
        let name = name.into();
        let existing = self.connections.lock().await.get(&name).cloned();
        if let Some(existing) = &existing {
            if existing.is_connected().await {
                return Err(ConnectionError::AlreadyConnected);
            }
            existing.close().await;
        }
        let connection = Arc::new(ServerConnection::new(config));
        let info = match connection.connect().await {
            Ok(info) => info,
            Err(e) => {
                tracing::error!(%name, error = %e, "failed to connect to server");
                return Err(e);
            }
        };
        let mut connections = self.connections.lock().await;
        let replaced = connections.get(&name);
        let raced = match (&existing, replaced) {
            (_, None) => false,
            (Some(seen), Some(current)) => !Arc::ptr_eq(seen, current),
            (None, Some(_)) => true,
        };
        if raced {
            // a concurrent connect under the same name got there first
            drop(connections);
            connection.close().await;
            return Err(ConnectionError::AlreadyConnected);
        }
        tracing::info!(%name, "connected to server");
        connections.insert(name, connection);
        Ok(info)
    }

    pub async fn connect_default(
        &self,
        config: SseClientConfig,
    ) -> Result<ServerInfo, ConnectionError> {
        self.connect(Self::DEFAULT, config).await
    }

    /// Call a tool on the default connection and render its text content,
    /// one line per content item.
    pub async fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: Option<JsonObject>,
    ) -> Result<String, ConnectionError> {
        self.call_tool_on(Self::DEFAULT, name, arguments).await
    }

    pub async fn call_tool_on(
        &self,
        connection: &str,
        name: impl Into<String>,
        arguments: Option<JsonObject>,
    ) -> Result<String, ConnectionError> {
        let name = name.into();
        let target = Self::get(&*self.connections.lock().await, connection)?;
        let result = target.call_tool(name.clone(), arguments).await.inspect_err(|e| {
            tracing::error!(tool = %name, error = %e, "tool call failed");
        })?;
        let skipped = result
            .content
            .iter()
            .filter(|content| content.as_text().is_none())
            .count();
        if skipped > 0 {
            tracing::warn!(tool = %name, skipped, "ignoring non-text content");
        }
        Ok(result.text())
    }

    pub async fn list_tools_on(&self, connection: &str) -> Result<Vec<Tool>, ConnectionError> {
        let target = Self::get(&*self.connections.lock().await, connection)?;
        target.list_tools().await
    }

    pub async fn close_all(&self) {
        let connections = std::mem::take(&mut *self.connections.lock().await);
        for (name, connection) in connections {
            tracing::debug!(%name, "closing connection");
            connection.close().await;
        }
    }
}
