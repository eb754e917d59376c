use std::borrow::Cow;

use serde_json::Value;
use thiserror::Error;

use super::*;
use crate::model::{
    CallToolRequestParams, CallToolResult, ClientInfo, EmptyResult, GetPromptRequestParams,
    GetPromptResult, JsonObject, ListPromptsResult, ListResourcesResult, ListToolsResult,
    PaginatedRequestParams, ReadResourceRequestParams, ReadResourceResult, ServerInfo,
};

/// It represents the error that may occur when serving the client.
#[derive(Error, Debug)]
pub enum ClientInitializeError {
    #[error("expect initialized response, but received: {0:?}")]
    ExpectedInitResponse(Option<JsonRpcMessage>),

    #[error("initialize failed: {0}")]
    InitializeFailed(ErrorData),

    #[error("invalid initialize result: {0}")]
    InvalidInitResult(#[source] serde_json::Error),

    #[error("conflict initialized response id: expected {0}, got {1}")]
    ConflictInitResponseId(RequestId, RequestId),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Send message error {error}, when {context}")]
    TransportError {
        #[source]
        error: TransportError,
        context: Cow<'static, str>,
    },

    #[error("no initialize response within {0:?}")]
    Timeout(Duration),
}

impl ClientInitializeError {
    pub fn transport(error: TransportError, context: impl Into<Cow<'static, str>>) -> Self {
        Self::TransportError {
            error,
            context: context.into(),
        }
    }
}

/// Client side behavior. Every method has a default, so `()` is a valid
/// handler for clients that only call the server.
pub trait ClientHandler: Send + Sync + 'static {
    fn get_info(&self) -> ClientInfo {
        ClientInfo::default()
    }

    /// Requests initiated by the server. Only `ping` is answered by default.
    fn handle_request(
        &self,
        request: JsonRpcRequest,
        context: RequestContext,
    ) -> impl Future<Output = Result<Value, ErrorData>> + Send + '_ {
        let _ = context;
        let result = match request.method.as_str() {
            method::PING => Ok(Value::Object(Default::default())),
            other => Err(ErrorData::method_not_found(other)),
        };
        std::future::ready(result)
    }

    fn handle_notification(
        &self,
        notification: JsonRpcNotification,
        context: NotificationContext,
    ) -> impl Future<Output = ()> + Send + '_ {
        let _ = context;
        tracing::debug!(method = %notification.method, "server notification");
        std::future::ready(())
    }
}

impl ClientHandler for () {}

impl<H: ClientHandler> Service for H {
    fn handle_request(
        &self,
        request: JsonRpcRequest,
        context: RequestContext,
    ) -> impl Future<Output = Result<Value, ErrorData>> + Send + '_ {
        ClientHandler::handle_request(self, request, context)
    }

    fn handle_notification(
        &self,
        notification: JsonRpcNotification,
        context: NotificationContext,
    ) -> impl Future<Output = ()> + Send + '_ {
        ClientHandler::handle_notification(self, notification, context)
    }
}

/// A connected, initialized client.
///
/// Dereferences to the [`RunningService`], and through it to the [`Peer`].
#[derive(Debug)]
pub struct McpClient<H: ClientHandler = ()> {
    running: RunningService<H>,
    server_info: ServerInfo,
}

impl<H: ClientHandler> std::ops::Deref for McpClient<H> {
    type Target = RunningService<H>;

    fn deref(&self) -> &Self::Target {
        &self.running
    }
}

pub async fn serve_client<H, T>(
    handler: H,
    transport: T,
) -> Result<McpClient<H>, ClientInitializeError>
where
    H: ClientHandler,
    T: Transport,
{
    serve_client_with_config(handler, transport, ServiceConfig::default()).await
}

pub async fn serve_client_with_config<H, T>(
    handler: H,
    transport: T,
    config: ServiceConfig,
) -> Result<McpClient<H>, ClientInitializeError>
where
    H: ClientHandler,
    T: Transport,
{
    let mut connection = Connection::open(transport)
        .await
        .map_err(|e| ClientInitializeError::transport(e, "start transport"))?;
    let (peer, sink_rx) = Peer::new(&config);

    let handshake = async {
        let id = peer.next_request_id();
        let params = serde_json::to_value(handler.get_info()).map_err(|e| {
            ClientInitializeError::transport(TransportError::Encode(e), "encode initialize")
        })?;
        connection
            .send(JsonRpcMessage::request(id.clone(), method::INITIALIZE, Some(params)))
            .await
            .map_err(|e| ClientInitializeError::transport(e, "send initialize request"))?;
        let response = loop {
            match connection.next_message().await {
                Some(JsonRpcMessage::Response(response)) => break response,
                // servers may ping before the handshake completes
                Some(JsonRpcMessage::Request(request)) if request.method == method::PING => {
                    connection
                        .send(JsonRpcMessage::response(
                            request.id,
                            Value::Object(Default::default()),
                        ))
                        .await
                        .map_err(|e| ClientInitializeError::transport(e, "answer ping"))?;
                }
                Some(message) => {
                    return Err(ClientInitializeError::ExpectedInitResponse(Some(message)));
                }
                None => {
                    return Err(ClientInitializeError::ConnectionClosed(
                        "initialize response".to_string(),
                    ));
                }
            }
        };
        if response.id != id {
            return Err(ClientInitializeError::ConflictInitResponseId(id, response.id));
        }
        let result = response
            .into_result()
            .map_err(ClientInitializeError::InitializeFailed)?;
        let server_info: ServerInfo =
            serde_json::from_value(result).map_err(ClientInitializeError::InvalidInitResult)?;
        connection
            .send(JsonRpcMessage::notification(method::NOTIFICATION_INITIALIZED, None))
            .await
            .map_err(|e| ClientInitializeError::transport(e, "send initialized notification"))?;
        Ok::<_, ClientInitializeError>(server_info)
    };
    let handshake = match config.request_timeout {
        Some(timeout) => tokio::time::timeout(timeout, handshake)
            .await
            .unwrap_or(Err(ClientInitializeError::Timeout(timeout))),
        None => handshake.await,
    };
    let server_info = match handshake {
        Ok(server_info) => server_info,
        Err(e) => {
            connection.close().await;
            return Err(e);
        }
    };
    tracing::info!(
        server = %server_info.server_info.name,
        version = %server_info.server_info.version,
        protocol = %server_info.protocol_version,
        "initialized"
    );
    peer.set_info(PeerInfo::Server(server_info.clone()));
    Ok(McpClient {
        running: spawn_service(handler, connection, peer, sink_rx),
        server_info,
    })
}

impl<H: ClientHandler> McpClient<H> {
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    fn require(&self, supported: bool, capability: &'static str) -> Result<(), ServiceError> {
        if supported {
            Ok(())
        } else {
            Err(ServiceError::CapabilityNotSupported(capability))
        }
    }

    pub async fn ping(&self) -> Result<(), ServiceError> {
        self.peer()
            .request::<(), EmptyResult>(method::PING, None)
            .await
            .map(|_| ())
    }

    pub async fn list_tools(
        &self,
        params: Option<PaginatedRequestParams>,
    ) -> Result<ListToolsResult, ServiceError> {
        self.require(self.server_info.capabilities.tools.is_some(), "tools")?;
        self.peer().request(method::TOOLS_LIST, params).await
    }

    pub async fn call_tool(
        &self,
        name: impl Into<Cow<'static, str>>,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, ServiceError> {
        self.require(self.server_info.capabilities.tools.is_some(), "tools")?;
        let params = CallToolRequestParams {
            name: name.into(),
            arguments,
        };
        self.peer().request(method::TOOLS_CALL, Some(params)).await
    }

    pub async fn list_resources(
        &self,
        params: Option<PaginatedRequestParams>,
    ) -> Result<ListResourcesResult, ServiceError> {
        self.require(self.server_info.capabilities.resources.is_some(), "resources")?;
        self.peer().request(method::RESOURCES_LIST, params).await
    }

    pub async fn read_resource(
        &self,
        uri: impl Into<String>,
    ) -> Result<ReadResourceResult, ServiceError> {
        self.require(self.server_info.capabilities.resources.is_some(), "resources")?;
        let params = ReadResourceRequestParams { uri: uri.into() };
        self.peer().request(method::RESOURCES_READ, Some(params)).await
    }

    pub async fn list_prompts(
        &self,
        params: Option<PaginatedRequestParams>,
    ) -> Result<ListPromptsResult, ServiceError> {
        self.require(self.server_info.capabilities.prompts.is_some(), "prompts")?;
        self.peer().request(method::PROMPTS_LIST, params).await
    }

    pub async fn get_prompt(
        &self,
        name: impl Into<String>,
        arguments: Option<JsonObject>,
    ) -> Result<GetPromptResult, ServiceError> {
        self.require(self.server_info.capabilities.prompts.is_some(), "prompts")?;
        let params = GetPromptRequestParams {
            name: name.into(),
            arguments,
        };
        self.peer().request(method::PROMPTS_GET, Some(params)).await
    }

    /// List every tool, following `nextCursor` until the server stops paging.
    pub async fn list_all_tools(&self) -> Result<Vec<crate::model::Tool>, ServiceError> {
        let mut tools = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .list_tools(Some(PaginatedRequestParams { cursor }))
                .await?;
            tools.extend(page.tools);
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(tools)
    }
}
