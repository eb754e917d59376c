use std::{borrow::Cow, collections::HashMap, future::Future};

use futures::{FutureExt, future::BoxFuture};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use super::*;
use crate::{
    handler::server::{
        PromptContext, PromptRoute, PromptRouter, ReadResourceContext, ResourceRoute,
        ResourceRouter, ToolCallContext, ToolRoute, ToolRouter,
    },
    model::{
        CallToolRequestParams, ClientInfo, GetPromptRequestParams, Implementation,
        ListPromptsResult, ListResourcesResult, ListToolsResult, PromptsCapability,
        ProtocolVersion, ReadResourceRequestParams, ResourcesCapability, ServerCapabilities,
        ServerInfo, ToolsCapability,
    },
};

/// It represents the error that may occur when serving the server.
#[derive(Error, Debug)]
pub enum ServerInitializeError {
    #[error("expect initialize request, but received: {0:?}")]
    ExpectedInitializeRequest(Option<JsonRpcMessage>),

    #[error("expect initialized notification, but received: {0:?}")]
    ExpectedInitializedNotification(Option<JsonRpcMessage>),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("initialize failed: {0}")]
    InitializeFailed(ErrorData),

    #[error("Send message error {error}, when {context}")]
    TransportError {
        #[source]
        error: TransportError,
        context: Cow<'static, str>,
    },
}

impl ServerInitializeError {
    pub fn transport(error: TransportError, context: impl Into<Cow<'static, str>>) -> Self {
        Self::TransportError {
            error,
            context: context.into(),
        }
    }
}

pub async fn serve_server<S, T>(
    service: S,
    transport: T,
) -> Result<RunningService<S>, ServerInitializeError>
where
    S: Service,
    T: Transport,
{
    serve_server_with_config(service, transport, ServiceConfig::default()).await
}

/// Wait for the client's `initialize`, answer it through `service`, wait for
/// `notifications/initialized` and then hand the connection to the service
/// loop.
pub async fn serve_server_with_config<S, T>(
    service: S,
    transport: T,
    config: ServiceConfig,
) -> Result<RunningService<S>, ServerInitializeError>
where
    S: Service,
    T: Transport,
{
    let mut connection = Connection::open(transport)
        .await
        .map_err(|e| ServerInitializeError::transport(e, "start transport"))?;
    let (peer, sink_rx) = Peer::new(&config);
    match handshake(&service, &mut connection, &peer).await {
        Ok(()) => Ok(spawn_service(service, connection, peer, sink_rx)),
        Err(e) => {
            connection.close().await;
            Err(e)
        }
    }
}

async fn handshake<S: Service, T: Transport>(
    service: &S,
    connection: &mut Connection<T>,
    peer: &Peer,
) -> Result<(), ServerInitializeError> {
    let request = match connection.next_message().await {
        Some(JsonRpcMessage::Request(request)) if request.method == method::INITIALIZE => request,
        Some(message) => {
            return Err(ServerInitializeError::ExpectedInitializeRequest(Some(message)));
        }
        None => {
            return Err(ServerInitializeError::ConnectionClosed(
                "initialize request".to_string(),
            ));
        }
    };
    let id = request.id.clone();
    let client_info = request
        .params
        .clone()
        .and_then(|params| serde_json::from_value::<ClientInfo>(params).ok());
    let context = RequestContext {
        id: id.clone(),
        ct: CancellationToken::new(),
        peer: peer.clone(),
    };
    match service.handle_request(request, context).await {
        Ok(result) => {
            connection
                .send(JsonRpcMessage::response(id, result))
                .await
                .map_err(|e| ServerInitializeError::transport(e, "send initialize response"))?;
        }
        Err(error) => {
            connection
                .send(JsonRpcMessage::error(id, error.clone()))
                .await
                .map_err(|e| ServerInitializeError::transport(e, "send initialize error"))?;
            return Err(ServerInitializeError::InitializeFailed(error));
        }
    }
    if let Some(client_info) = client_info {
        tracing::info!(
            client = %client_info.client_info.name,
            version = %client_info.client_info.version,
            protocol = %client_info.protocol_version,
            "client initializing"
        );
        peer.set_info(PeerInfo::Client(client_info));
    }
    match connection.next_message().await {
        Some(JsonRpcMessage::Notification(notification))
            if notification.method == method::NOTIFICATION_INITIALIZED =>
        {
            service
                .handle_notification(notification, NotificationContext { peer: peer.clone() })
                .await;
            Ok(())
        }
        Some(message) => Err(ServerInitializeError::ExpectedInitializedNotification(Some(
            message,
        ))),
        None => Err(ServerInitializeError::ConnectionClosed(
            "initialized notification".to_string(),
        )),
    }
}

type DynRequestHandler = dyn Fn(
    Option<Value>,
    RequestContext,
) -> BoxFuture<'static, Result<Value, ErrorData>>
    + Send
    + Sync;

/// A router based MCP server.
///
/// Cheap to clone; [`SseServer::with_service`](crate::transport::SseServer::with_service)
/// clones one per session.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    info: Implementation,
    instructions: Option<String>,
    tools: ToolRouter,
    resources: ResourceRouter,
    prompts: PromptRouter,
    handlers: HashMap<String, Arc<DynRequestHandler>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("info", &self.inner.info)
            .field("tools", &self.inner.tools)
            .field("resources", &self.inner.resources)
            .field("prompts", &self.inner.prompts)
            .field("handlers", &self.inner.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn parse_params<P: DeserializeOwned>(params: Option<Value>) -> Result<P, ErrorData> {
    serde_json::from_value(params.unwrap_or(Value::Object(Default::default())))
        .map_err(|e| ErrorData::invalid_params(format!("invalid params: {e}"), None))
}

fn to_result<R: serde::Serialize>(result: R) -> Result<Value, ErrorData> {
    serde_json::to_value(result).map_err(|e| ErrorData::internal_error(e.to_string(), None))
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// The `initialize` result: capabilities follow whatever was registered.
    pub fn get_info(&self) -> ServerInfo {
        let inner = &self.inner;
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities {
                tools: (!inner.tools.is_empty()).then_some(ToolsCapability {
                    list_changed: Some(true),
                }),
                resources: (!inner.resources.is_empty()).then_some(ResourcesCapability {
                    subscribe: None,
                    list_changed: Some(true),
                }),
                prompts: (!inner.prompts.is_empty()).then_some(PromptsCapability {
                    list_changed: Some(true),
                }),
                ..Default::default()
            },
            server_info: inner.info.clone(),
            instructions: inner.instructions.clone(),
        }
    }

    pub fn tools(&self) -> &ToolRouter {
        &self.inner.tools
    }

    pub fn resources(&self) -> &ResourceRouter {
        &self.inner.resources
    }

    pub fn prompts(&self) -> &PromptRouter {
        &self.inner.prompts
    }

    fn initialize(&self, params: Option<Value>) -> Result<Value, ErrorData> {
        let client: ClientInfo = parse_params(params)?;
        let mut info = self.get_info();
        // answer in the client's version when it is one we speak
        if client.protocol_version == ProtocolVersion::V_2024_11_05 {
            info.protocol_version = client.protocol_version;
        }
        to_result(info)
    }

    async fn dispatch(
        &self,
        request: JsonRpcRequest,
        context: RequestContext,
    ) -> Result<Value, ErrorData> {
        let inner = &self.inner;
        let JsonRpcRequest {
            method: name,
            params,
            ..
        } = request;
        if let Some(handler) = inner.handlers.get(&name) {
            return handler(params, context).await;
        }
        match name.as_str() {
            method::INITIALIZE => self.initialize(params),
            method::PING => Ok(Value::Object(Default::default())),
            method::TOOLS_LIST if !inner.tools.is_empty() => to_result(ListToolsResult {
                tools: inner.tools.list_all(),
                next_cursor: None,
            }),
            method::TOOLS_CALL if !inner.tools.is_empty() => {
                let CallToolRequestParams { name, arguments } = parse_params(params)?;
                let result = inner
                    .tools
                    .call(ToolCallContext {
                        name,
                        arguments,
                        request: context,
                    })
                    .await?;
                to_result(result)
            }
            method::RESOURCES_LIST if !inner.resources.is_empty() => {
                to_result(ListResourcesResult {
                    resources: inner.resources.list_all(),
                    next_cursor: None,
                })
            }
            method::RESOURCES_READ if !inner.resources.is_empty() => {
                let ReadResourceRequestParams { uri } = parse_params(params)?;
                let result = inner
                    .resources
                    .read(ReadResourceContext {
                        uri,
                        request: context,
                    })
                    .await?;
                to_result(result)
            }
            method::PROMPTS_LIST if !inner.prompts.is_empty() => to_result(ListPromptsResult {
                prompts: inner.prompts.list_all(),
                next_cursor: None,
            }),
            method::PROMPTS_GET if !inner.prompts.is_empty() => {
                let GetPromptRequestParams { name, arguments } = parse_params(params)?;
                let result = inner
                    .prompts
                    .get(PromptContext {
                        name,
                        arguments,
                        request: context,
                    })
                    .await?;
                to_result(result)
            }
            other => Err(ErrorData::method_not_found(other)),
        }
    }
}

impl Service for Server {
    fn handle_request(
        &self,
        request: JsonRpcRequest,
        context: RequestContext,
    ) -> impl Future<Output = Result<Value, ErrorData>> + Send + '_ {
        self.dispatch(request, context)
    }

    fn handle_notification(
        &self,
        notification: JsonRpcNotification,
        context: NotificationContext,
    ) -> impl Future<Output = ()> + Send + '_ {
        let _ = context;
        match notification.method.as_str() {
            method::NOTIFICATION_INITIALIZED => tracing::info!("client initialized"),
            other => tracing::debug!(method = %other, "client notification"),
        }
        std::future::ready(())
    }
}

#[derive(Default)]
pub struct ServerBuilder {
    info: Option<Implementation>,
    instructions: Option<String>,
    tools: ToolRouter,
    resources: ResourceRouter,
    prompts: PromptRouter,
    handlers: HashMap<String, Arc<DynRequestHandler>>,
}

impl ServerBuilder {
    pub fn server_info(mut self, info: Implementation) -> Self {
        self.info = Some(info);
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn tool(mut self, route: ToolRoute) -> Self {
        self.tools.add_route(route);
        self
    }

    pub fn resource(mut self, route: ResourceRoute) -> Self {
        self.resources.add_route(route);
        self
    }

    pub fn prompt(mut self, route: PromptRoute) -> Self {
        self.prompts.add_route(route);
        self
    }

    /// Answer `method` with `handler`. Takes precedence over the built-in
    /// methods, so it can also replace them.
    pub fn set_request_handler<H, Fut>(mut self, method: impl Into<String>, handler: H) -> Self
    where
        H: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ErrorData>> + Send + 'static,
    {
        let handler: Arc<DynRequestHandler> =
            Arc::new(move |params, context| handler(params, context).boxed());
        self.handlers.insert(method.into(), handler);
        self
    }

    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(ServerInner {
                info: self.info.unwrap_or_default(),
                instructions: self.instructions,
                tools: self.tools,
                resources: self.resources,
                prompts: self.prompts,
                handlers: self.handlers,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{CallToolResult, Content, ErrorCode, Tool};

    fn request(method: &str, params: Option<Value>) -> (JsonRpcRequest, RequestContext) {
        let (peer, _sink) = Peer::detached();
        let request = JsonRpcRequest {
            jsonrpc: Default::default(),
            id: 7.into(),
            method: method.to_string(),
            params,
        };
        let context = RequestContext {
            id: 7.into(),
            ct: CancellationToken::new(),
            peer,
        };
        (request, context)
    }

    async fn call(
        server: &Server,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ErrorData> {
        let (request, context) = request(method, params);
        server.handle_request(request, context).await
    }

    fn echo_server() -> Server {
        Server::builder()
            .server_info(Implementation::new("echo", "1.0.0"))
            .tool(ToolRoute::new(
                Tool::new("echo", "Echo the arguments", Tool::empty_input_schema()),
                |context: ToolCallContext| async move {
                    let text = Value::Object(context.arguments.unwrap_or_default()).to_string();
                    Ok(CallToolResult::success(vec![Content::text(text)]))
                },
            ))
            .build()
    }

    #[tokio::test]
    async fn test_capabilities_follow_registration() {
        let info = echo_server().get_info();
        assert_eq!(
            info.capabilities.tools,
            Some(ToolsCapability {
                list_changed: Some(true)
            })
        );
        assert!(info.capabilities.resources.is_none());
        assert!(info.capabilities.prompts.is_none());
        assert_eq!(info.server_info.name, "echo");
    }

    #[tokio::test]
    async fn test_builtin_methods() {
        let server = echo_server();
        let init = call(
            &server,
            method::INITIALIZE,
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "0.1.0"}
            })),
        )
        .await
        .unwrap();
        assert_eq!(init["protocolVersion"], "2024-11-05");
        assert_eq!(init["capabilities"]["tools"]["listChanged"], true);

        assert_eq!(call(&server, method::PING, None).await.unwrap(), json!({}));

        let tools = call(&server, method::TOOLS_LIST, None).await.unwrap();
        assert_eq!(tools["tools"][0]["name"], "echo");

        let result = call(
            &server,
            method::TOOLS_CALL,
            Some(json!({"name": "echo", "arguments": {"a": 1}})),
        )
        .await
        .unwrap();
        assert_eq!(result["content"][0]["text"], r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_error_codes() {
        let server = echo_server();
        let err = call(&server, "nope", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::METHOD_NOT_FOUND);

        // nothing registered, so the method does not exist
        let err = call(&server, method::RESOURCES_LIST, None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::METHOD_NOT_FOUND);

        let err = call(&server, method::TOOLS_CALL, Some(json!({"arguments": {}})))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);

        let err = call(&server, method::INITIALIZE, Some(json!({"protocolVersion": 1})))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_custom_handler_takes_precedence() {
        let server = Server::builder()
            .set_request_handler(method::PING, |_params, _context| async {
                Ok(json!({"pong": true}))
            })
            .set_request_handler("custom/echo", |params, _context| async move {
                Ok(params.unwrap_or(Value::Null))
            })
            .build();
        assert_eq!(call(&server, method::PING, None).await.unwrap(), json!({"pong": true}));
        assert_eq!(
            call(&server, "custom/echo", Some(json!([1, 2]))).await.unwrap(),
            json!([1, 2])
        );
    }
}
