use mcp_sse::{
    Server,
    handler::server::{PromptContext, PromptRoute, ReadResourceContext, ResourceRoute, ToolRoute},
    model::{
        GetPromptResult, Implementation, Prompt, PromptArgument, PromptMessage,
        ReadResourceResult, Resource, ResourceContents, Role,
    },
};

use super::ls::{ListDirectory, ls};

const PROJECT_NAME: &str = "Project Name";

pub fn demo_server() -> Server {
    Server::builder()
        .server_info(Implementation::new("mcp-sse demo server", env!("CARGO_PKG_VERSION")))
        .prompt(PromptRoute::new(
            Prompt {
                name: "Rust Developer".into(),
                description: Some("Develop small rust applications".into()),
                arguments: Some(vec![PromptArgument {
                    name: PROJECT_NAME.into(),
                    description: Some("Project name for the new project".into()),
                    required: Some(true),
                }]),
            },
            |context: PromptContext| async move {
                let project = context.argument_str(PROJECT_NAME).unwrap_or_default();
                Ok(GetPromptResult {
                    description: Some(format!("Description for {}", context.name)),
                    messages: vec![PromptMessage::new_text(
                        Role::User,
                        format!("Develop a rust project named <name>{project}</name>"),
                    )],
                })
            },
        ))
        .tool(ToolRoute::typed(
            "ls",
            "List directory contents",
            |args: ListDirectory| ls(args),
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
                    contents: vec![ResourceContents::TextResourceContents {
                        text: format!("Placeholder content for {}", context.uri),
                        uri: context.uri,
                        mime_type: Some("text/html".into()),
                    }],
                })
            },
        ))
        .build()
}
