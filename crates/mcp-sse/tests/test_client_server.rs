#![cfg(all(feature = "client", feature = "server"))]

use std::time::Duration;

use mcp_sse::{
    ServiceConfig, ServiceError,
    model::{ErrorCode, PaginatedRequestParams},
    service::{serve_client, serve_client_with_config},
    transport::SseClientTransport,
};
use serde_json::json;

mod common;
use common::calculator::{calculator, tools_only};

fn arguments(value: serde_json::Value) -> Option<mcp_sse::model::JsonObject> {
    value.as_object().cloned()
}

fn mcp_error_code<T>(result: &Result<T, ServiceError>) -> Option<ErrorCode> {
    match result {
        Err(ServiceError::McpError(e)) => Some(e.code),
        _ => None,
    }
}

#[tokio::test]
async fn test_full_session() -> anyhow::Result<()> {
    common::init();
    let (server, url) = common::serve().await?;
    let registry = server.registry().clone();
    let ct = server.with_service(calculator);

    let client = serve_client((), SseClientTransport::new(url)?).await?;
    let info = client.server_info();
    assert_eq!(info.server_info.name, "calculator");
    assert!(info.capabilities.tools.is_some());
    assert!(info.capabilities.resources.is_some());
    assert!(info.capabilities.prompts.is_some());

    client.ping().await?;

    let tools = client.list_tools(Some(PaginatedRequestParams::default())).await?;
    let names: Vec<_> = tools.tools.iter().map(|tool| tool.name.as_ref()).collect();
    assert_eq!(names, ["sleep", "sub", "sum"]);
    let sum = tools.tools.iter().find(|tool| tool.name == "sum").unwrap();
    assert_eq!(sum.input_schema["type"], "object");
    assert!(sum.input_schema["properties"].get("a").is_some());

    let result = client.call_tool("sum", arguments(json!({"a": 1, "b": 2}))).await?;
    assert_eq!(result.text(), "3");
    let result = client.call_tool("sub", arguments(json!({"a": 1, "b": 2}))).await?;
    assert_eq!(result.text(), "-1");

    let resources = client.list_resources(None).await?;
    assert_eq!(resources.resources[0].uri, "https://search.com/");
    let read = client.read_resource("https://search.com/").await?;
    assert_eq!(read.contents[0].uri(), "https://search.com/");

    let prompts = client.list_prompts(None).await?;
    assert_eq!(prompts.prompts[0].name, "Greeting");
    let prompt = client
        .get_prompt("Greeting", arguments(json!({"name": "Ada"})))
        .await?;
    assert_eq!(prompt.messages[0].content.as_text(), Some("Hello, Ada!"));

    assert_eq!(registry.len(), 1);
    client.close().await?;
    assert!(client.is_closed());
    assert!(common::eventually(|| registry.is_empty()).await);
    ct.cancel();
    Ok(())
}

#[tokio::test]
async fn test_errors_from_server() -> anyhow::Result<()> {
    common::init();
    let (server, url) = common::serve().await?;
    let ct = server.with_service(calculator);
    let client = serve_client((), SseClientTransport::new(url)?).await?;

    let invalid = client.call_tool("sum", arguments(json!({"a": "one"}))).await;
    assert!(
        matches!(&invalid, Err(ServiceError::McpError(e)) if e.code == ErrorCode::INVALID_PARAMS),
        "{invalid:?}"
    );

    let unknown = client.call_tool("divide", None).await;
    assert_eq!(mcp_error_code(&unknown), Some(ErrorCode::INVALID_PARAMS));

    let missing = client.read_resource("file:///nope").await;
    assert_eq!(mcp_error_code(&missing), Some(ErrorCode::RESOURCE_NOT_FOUND));

    let missing_argument = client.get_prompt("Greeting", None).await;
    assert_eq!(mcp_error_code(&missing_argument), Some(ErrorCode::INVALID_PARAMS));

    let not_found = client.peer().send_request("no/such/method", None).await;
    assert_eq!(mcp_error_code(&not_found), Some(ErrorCode::METHOD_NOT_FOUND));

    // the session survives all of the above
    client.ping().await?;
    client.close().await?;
    ct.cancel();
    Ok(())
}

#[tokio::test]
async fn test_capability_not_advertised() -> anyhow::Result<()> {
    common::init();
    let (server, url) = common::serve().await?;
    let ct = server.with_service(tools_only);
    let client = serve_client((), SseClientTransport::new(url)?).await?;

    assert!(client.server_info().capabilities.resources.is_none());
    assert!(matches!(
        client.list_resources(None).await,
        Err(ServiceError::CapabilityNotSupported("resources"))
    ));
    assert!(matches!(
        client.get_prompt("Greeting", None).await,
        Err(ServiceError::CapabilityNotSupported("prompts"))
    ));
    assert_eq!(client.list_all_tools().await?.len(), 1);

    client.close().await?;
    ct.cancel();
    Ok(())
}

#[tokio::test]
async fn test_concurrent_clients() -> anyhow::Result<()> {
    common::init();
    let (server, url) = common::serve().await?;
    let registry = server.registry().clone();
    let ct = server.with_service(calculator);

    let mut handles = Vec::new();
    for i in 0..10 {
        let url = url.clone();
        handles.push(tokio::spawn(async move {
            let client = serve_client((), SseClientTransport::new(url)?).await?;
            // several requests in flight on one session at once
            let (left, right) = tokio::join!(
                client.call_tool("sum", arguments(json!({"a": i, "b": 1}))),
                client.call_tool("sub", arguments(json!({"a": i, "b": 1}))),
            );
            assert_eq!(left?.text(), (i + 1).to_string());
            assert_eq!(right?.text(), (i - 1).to_string());
            client.close().await?;
            anyhow::Ok(())
        }));
    }
    for handle in handles {
        handle.await??;
    }
    assert!(common::eventually(|| registry.is_empty()).await);
    ct.cancel();
    Ok(())
}

#[tokio::test]
async fn test_request_timeout_is_reported() -> anyhow::Result<()> {
    common::init();
    let (server, url) = common::serve().await?;
    let ct = server.with_service(calculator);
    let config = ServiceConfig {
        request_timeout: Some(Duration::from_millis(500)),
    };
    let client = serve_client_with_config((), SseClientTransport::new(url)?, config).await?;

    let slow = client
        .call_tool("sleep", arguments(json!({"millis": 3_000})))
        .await;
    assert!(matches!(slow, Err(ServiceError::Timeout { .. })), "{slow:?}");

    // the cancelled request does not poison the session
    let fast = client.call_tool("sum", arguments(json!({"a": 2, "b": 2}))).await?;
    assert_eq!(fast.text(), "4");

    client.close().await?;
    ct.cancel();
    Ok(())
}

#[tokio::test]
async fn test_server_shutdown_fails_pending_requests() -> anyhow::Result<()> {
    common::init();
    let (server, url) = common::serve().await?;
    let ct = server.with_service(calculator);
    let client = serve_client((), SseClientTransport::new(url)?).await?;

    let pending = client.call_tool("sleep", arguments(json!({"millis": 10_000})));
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        ct.cancel();
    };
    let (result, ()) = tokio::join!(pending, cancel);
    assert!(
        matches!(result, Err(ServiceError::TransportClosed)),
        "{result:?}"
    );
    tokio::time::timeout(common::WAIT, client.waiting()).await?;
    Ok(())
}
