use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metabase_mcp_runtime::{GatewayArgs, McpCommands, run};

#[derive(Parser)]
#[command(
    name = "metabase-mcp",
    version,
    about = "Metabase MCP server: Metabase tools for AI clients over stdio"
)]
struct Cli {
    #[command(flatten)]
    gateway: GatewayArgs,

    #[command(subcommand)]
    command: Option<McpCommands>,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metabase_mcp=info,metabase_mcp_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let code = run(cli.gateway, cli.command.unwrap_or(McpCommands::Serve)).await;
    std::process::exit(code);
}
