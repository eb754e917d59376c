use clap::Parser;
use mcp_sse::{
    serve_client,
    transport::{SseClientConfig, SseClientTransport},
};
use mcp_sse_demos::common;
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "sse-client", about = "List resources and a directory through an MCP SSE server")]
struct Args {
    #[arg(long, env = "MCP_SSE_URL", default_value = SseClientConfig::DEFAULT_URI)]
    url: String,

    #[arg(default_value = ".", help = "Directory to list, relative to the server")]
    path: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::init_tracing();
    let args = Args::parse();

    let transport = SseClientTransport::new(args.url)?;
    let client = serve_client((), transport).await?;
    let server = &client.server_info().server_info;
    println!("Connected to {} {}", server.name, server.version);

    let resources = client.list_resources(None).await?;
    println!("Resources:");
    for resource in &resources.resources {
        println!("  {} ({})", resource.name, resource.uri);
    }

    let result = client
        .call_tool("ls", json!({ "path": args.path }).as_object().cloned())
        .await?;
    println!("ls {}:", args.path);
    for line in result.text().lines() {
        println!("  {line}");
    }
    if result.is_error == Some(true) {
        tracing::warn!("ls reported an error");
    }

    client.close().await?;
    Ok(())
}
