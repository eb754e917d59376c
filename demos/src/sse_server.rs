use std::net::SocketAddr;

use clap::Parser;
use mcp_sse::transport::{SseServer, SseServerConfig};
use mcp_sse_demos::common;

#[derive(Parser, Debug)]
#[command(name = "sse-server", about = "Serve the demo MCP server over SSE")]
struct Args {
    #[arg(long, env = "MCP_SSE_BIND", default_value = "127.0.0.1:3001")]
    bind: SocketAddr,

    #[arg(
        long = "public-url",
        env = "MCP_SSE_PUBLIC_URL",
        help = "Base url clients use to reach this server, when it differs from the bind address"
    )]
    public_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::init_tracing();
    let args = Args::parse();

    let config = SseServerConfig {
        bind: args.bind,
        public_base_url: args.public_url,
        ..Default::default()
    };
    let server = SseServer::serve_with_config(config).await?;
    let base_url = server.config.base_url();
    println!("SSE endpoint:     {base_url}{}", server.config.sse_path);
    println!("Message endpoint: {base_url}{}", server.config.post_path);

    let ct = server.with_service(common::demo_server::demo_server);
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    ct.cancel();
    Ok(())
}
