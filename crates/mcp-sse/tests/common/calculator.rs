use std::time::Duration;

use mcp_sse::{
    Server,
    handler::server::{PromptContext, PromptRoute, ReadResourceContext, ResourceRoute, ToolRoute},
    model::{
        CallToolResult, Content, GetPromptResult, Implementation, Prompt, PromptArgument,
        PromptMessage, ReadResourceResult, Resource, ResourceContents, Role,
    },
};

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SumRequest {
    #[schemars(description = "the left hand side number")]
    pub a: i32,
    pub b: i32,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SleepRequest {
    pub millis: u64,
}

pub fn calculator() -> Server {
    Server::builder()
        .server_info(Implementation::new("calculator", "1.0.0"))
        .tool(ToolRoute::typed(
            "sum",
            "Calculate the sum of two numbers",
            |SumRequest { a, b }| async move {
                Ok(CallToolResult::success(vec![Content::text((a + b).to_string())]))
            },
        ))
        .tool(ToolRoute::typed(
            "sub",
            "Calculate the difference of two numbers",
            |SumRequest { a, b }| async move {
                Ok(CallToolResult::success(vec![Content::text((a - b).to_string())]))
            },
        ))
        .tool(ToolRoute::typed(
            "sleep",
            "Sleep, then answer",
            |SleepRequest { millis }| async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(CallToolResult::success(vec![Content::text("awake")]))
            },
        ))
        .resource(ResourceRoute::new(
            Resource {
                uri: "https://search.com/".into(),
                name: "Web Search".into(),
                description: Some("Web search engine".into()),
                mime_type: Some("text/html".into()),
            },
            |context: ReadResourceContext| async move {
                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::text(
                        format!("Placeholder content for {}", context.uri),
                        context.uri,
                    )],
                })
            },
        ))
        .prompt(PromptRoute::new(
            Prompt {
                name: "Greeting".into(),
                description: Some("Greet someone by name".into()),
                arguments: Some(vec![PromptArgument {
                    name: "name".into(),
                    description: Some("Who to greet".into()),
                    required: Some(true),
                }]),
            },
            |context: PromptContext| async move {
                let name = context.argument_str("name").unwrap_or_default().to_string();
                Ok(GetPromptResult {
                    description: Some("A greeting".into()),
                    messages: vec![PromptMessage::new_text(Role::User, format!("Hello, {name}!"))],
                })
            },
        ))
        .build()
}

/// A server with tools only.
pub fn tools_only() -> Server {
    Server::builder()
        .tool(ToolRoute::typed(
            "sum",
            "Calculate the sum of two numbers",
            |SumRequest { a, b }| async move {
                Ok(CallToolResult::success(vec![Content::text((a + b).to_string())]))
            },
        ))
        .build()
}
