#![cfg(all(feature = "client", feature = "server"))]

use mcp_sse::{
    Transport,
    model::{JsonRpcMessage, RequestId},
    transport::{SseServer, SseServerConfig},
};
use serde_json::json;

mod common;
use common::{RawSse, calculator::calculator};

const INITIALIZE: &str = concat!(
    r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"#,
    r#""protocolVersion":"2024-11-05","capabilities":{},"#,
    r#""clientInfo":{"name":"raw","version":"0.0.1"}}}"#,
);
const INITIALIZED: &str = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;

#[tokio::test]
async fn test_endpoint_is_first_event() -> anyhow::Result<()> {
    common::init();
    let (server, url) = common::serve().await?;
    let raw = RawSse::connect(&url).await?;

    let expected_prefix = format!("http://{}/message?sessionId=", server.config.bind);
    assert!(raw.endpoint.starts_with(&expected_prefix), "{}", raw.endpoint);
    let session_id = raw.session_id()?;
    assert!(uuid::Uuid::parse_str(&session_id).is_ok());
    assert!(server.registry().lookup(&session_id).is_ok());

    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_post_statuses() -> anyhow::Result<()> {
    common::init();
    let (server, url) = common::serve().await?;
    let raw = RawSse::connect(&url).await?;

    assert_eq!(raw.post(INITIALIZED).await?, reqwest::StatusCode::ACCEPTED);
    assert_eq!(raw.post("{not json").await?, reqwest::StatusCode::BAD_REQUEST);

    let missing = raw.endpoint.replace(&raw.session_id()?, "missing");
    let response = reqwest::Client::new().post(&missing).body(INITIALIZED).send().await?;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(response.text().await?, "Session not found");

    let no_query = format!("http://{}/message", server.config.bind);
    assert_eq!(
        common::post(&no_query, INITIALIZED).await?,
        reqwest::StatusCode::BAD_REQUEST
    );

    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_messages_are_pushed_to_their_own_stream() -> anyhow::Result<()> {
    common::init();
    let (mut server, url) = common::serve().await?;
    let mut first = RawSse::connect(&url).await?;
    let first_transport = server.next_transport().await.unwrap();
    let mut second = RawSse::connect(&url).await?;
    let second_transport = server.next_transport().await.unwrap();

    assert_ne!(first.session_id()?, second.session_id()?);
    assert_eq!(first_transport.session_id().as_ref(), first.session_id()?);
    assert_eq!(server.registry().len(), 2);

    first_transport.start().await?;
    second_transport.start().await?;
    second_transport
        .send(JsonRpcMessage::response(2, json!({"to": "second"})))
        .await?;
    first_transport
        .send(JsonRpcMessage::response(1, json!({"to": "first"})))
        .await?;

    let message = first.next_message().await?;
    assert_eq!(message.id(), Some(&RequestId::from(1)));
    let message = second.next_message().await?;
    assert_eq!(message.id(), Some(&RequestId::from(2)));

    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_dropped_stream_removes_session() -> anyhow::Result<()> {
    common::init();
    let (server, url) = common::serve().await?;
    let raw = RawSse::connect(&url).await?;
    let session_id = raw.session_id()?;
    assert_eq!(server.registry().len(), 1);

    drop(raw);
    let registry = server.registry().clone();
    assert!(common::eventually(|| registry.is_empty()).await);
    assert!(registry.lookup(&session_id).is_err());

    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_public_base_url_in_endpoint() -> anyhow::Result<()> {
    common::init();
    let config = SseServerConfig {
        public_base_url: Some("https://mcp.example.com/".to_string()),
        ..common::local_config()
    };
    let server = SseServer::serve_with_config(config).await?;
    let raw = RawSse::connect(&format!("http://{}/sse", server.config.bind)).await?;
    assert!(
        raw.endpoint
            .starts_with("https://mcp.example.com/message?sessionId="),
        "{}",
        raw.endpoint
    );
    server.cancel();
    Ok(())
}

#[tokio::test]
async fn test_shutdown_ends_streams() -> anyhow::Result<()> {
    common::init();
    let (server, url) = common::serve().await?;
    let mut raw = RawSse::connect(&url).await?;

    server.cancel();
    // keep-alive comments may still arrive before the end
    loop {
        match raw.next_raw().await? {
            None => break,
            Some(Ok(event)) => assert!(event.data.is_none(), "unexpected event {event:?}"),
            Some(Err(_)) => break,
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_service_over_raw_wire() -> anyhow::Result<()> {
    common::init();
    let (server, url) = common::serve().await?;
    let registry = server.registry().clone();
    let ct = server.with_service(calculator);

    let mut raw = RawSse::connect(&url).await?;
    assert_eq!(raw.post(INITIALIZE).await?, reqwest::StatusCode::ACCEPTED);
    let JsonRpcMessage::Response(initialized) = raw.next_message().await? else {
        anyhow::bail!("expected the initialize response");
    };
    let result = initialized.into_result().map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(result["serverInfo"]["name"], "calculator");
    assert_eq!(result["capabilities"]["tools"]["listChanged"], true);

    raw.post(INITIALIZED).await?;
    let sum_call = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": {"name": "sum", "arguments": {"a": 1, "b": 2}},
    });
    raw.post(&sum_call.to_string()).await?;
    let JsonRpcMessage::Response(sum) = raw.next_message().await? else {
        anyhow::bail!("expected the tools/call response");
    };
    assert_eq!(sum.id, RequestId::from(1));
    let sum = sum.into_result().map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(sum["content"][0]["text"], "3");

    raw.post(r#"{"jsonrpc":"2.0","id":2,"method":"no/such/method"}"#).await?;
    let JsonRpcMessage::Response(response) = raw.next_message().await? else {
        anyhow::bail!("expected an error response");
    };
    let error = response.into_result().expect_err("unknown method must fail");
    assert_eq!(error.code.0, -32601);

    drop(raw);
    assert!(common::eventually(|| registry.is_empty()).await);
    ct.cancel();
    Ok(())
}
