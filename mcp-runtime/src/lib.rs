//! MCP gateway to a Metabase instance: a fixed catalog of tools, each mapped
//! onto Metabase REST calls, served over stdio.

use std::sync::Arc;

use clap::{Args, Subcommand};
use metabase_core::{CredentialSource, ErrorCode, ErrorEnvelope};
use serde_json::{Value, json};

mod args;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod fallback;
pub mod registry;
pub mod server;
pub mod session;
pub mod tools;

pub use client::{ApiRequest, MetabaseClient, RequestBody, parse_base_url};
pub use dispatch::Dispatcher;
pub use error::{GatewayError, GatewayResult};
pub use registry::{CapabilityDescriptor, CapabilityRegistry, ToolGroup, ToolOutput};
pub use server::McpServer;
pub use session::{Session, SessionKind, SessionManager};

/// Connection settings, from flags or the environment (`.env` included).
#[derive(Args, Clone, Default)]
pub struct GatewayArgs {
    /// Base URL of the Metabase instance, e.g. https://metabase.example.com
    #[arg(long, env = "METABASE_URL")]
    pub metabase_url: Option<String>,
    /// API key; takes precedence over username/password
    #[arg(long, env = "METABASE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    #[arg(long, env = "METABASE_USERNAME")]
    pub username: Option<String>,
    #[arg(long, env = "METABASE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl std::fmt::Debug for GatewayArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayArgs")
            .field("metabase_url", &self.metabase_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Subcommand, Debug)]
pub enum McpCommands {
    /// Run the MCP server over stdio
    Serve,
    /// Print the tool catalog as JSON (no network access)
    Tools,
    /// Invoke one tool and print its result
    Call {
        /// Tool name, as listed by `tools`
        name: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

/// Validates configuration and wires catalog, client and session together.
/// Nothing touches the network until the first tool call.
pub fn build_dispatcher(args: &GatewayArgs) -> GatewayResult<Dispatcher> {
    let base_url = args
        .metabase_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| GatewayError::Configuration("METABASE_URL is required".to_string()))?;
    let credential = CredentialSource {
        api_key: args.api_key.clone(),
        username: args.username.clone(),
        password: args.password.clone(),
    }
    .resolve()?;

    let registry = tools::catalog()?;
    let client = MetabaseClient::new(base_url, credential)?;
    tracing::info!(
        base_url = %client.base_url(),
        auth = client.session().credential_kind(),
        tools = registry.len(),
        "Metabase gateway configured"
    );
    Ok(Dispatcher::new(Arc::new(registry), Arc::new(client)))
}

pub async fn run(args: GatewayArgs, command: McpCommands) -> i32 {
    match command {
        McpCommands::Tools => match tools::catalog() {
            Ok(registry) => {
                println!("{}", to_pretty_json(&json!({ "tools": registry.list_descriptors() })));
                0
            }
            Err(err) => report(&err.normalize()),
        },
        McpCommands::Serve => {
            let dispatcher = match build_dispatcher(&args) {
                Ok(dispatcher) => dispatcher,
                Err(err) => return report(&err.normalize()),
            };
            let server = McpServer::new(Arc::new(dispatcher));
            match server.serve_stdio().await {
                Ok(()) => 0,
                Err(err) => {
                    tracing::error!(error = %err, "MCP server stopped");
                    eprintln!(
                        "{}",
                        to_pretty_json(&json!({ "error": "mcp_server_error", "message": err }))
                    );
                    1
                }
            }
        }
        McpCommands::Call { name, args: raw } => {
            let arguments: Value = match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    return report(
                        &GatewayError::invalid_argument("args", format!("--args is not valid JSON: {e}"))
                            .normalize(),
                    );
                }
            };
            let dispatcher = match build_dispatcher(&args) {
                Ok(dispatcher) => dispatcher,
                Err(err) => return report(&err.normalize()),
            };
            match dispatcher.invoke(&name, arguments).await {
                Ok(envelope) => {
                    println!("{}", envelope.first_text().unwrap_or_default());
                    0
                }
                Err(envelope) => report(&envelope),
            }
        }
    }
}

/// Prints the envelope to stderr and picks the exit code.
fn report(envelope: &ErrorEnvelope) -> i32 {
    eprintln!("{}", to_pretty_json(&json!({ "error": envelope })));
    match envelope.code {
        ErrorCode::Configuration => 2,
        _ => 1,
    }
}

fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway_args() -> GatewayArgs {
        GatewayArgs {
            metabase_url: Some("https://metabase.example.com".to_string()),
            api_key: Some("mb_key".to_string()),
            ..GatewayArgs::default()
        }
    }

    #[test]
    fn dispatcher_requires_url_and_credential() {
        let missing_url = GatewayArgs {
            metabase_url: None,
            ..gateway_args()
        };
        assert_eq!(
            build_dispatcher(&missing_url).err().map(|err| err.code()),
            Some(ErrorCode::Configuration)
        );

        let missing_credential = GatewayArgs {
            api_key: Some("  ".to_string()),
            ..gateway_args()
        };
        assert_eq!(
            build_dispatcher(&missing_credential).err().map(|err| err.code()),
            Some(ErrorCode::Configuration)
        );

        let dispatcher = build_dispatcher(&gateway_args()).unwrap();
        assert!(dispatcher.registry().contains("list_dashboards"));
        assert!(dispatcher.client().session().cached_session().is_some());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let args = GatewayArgs {
            password: Some("hunter2".to_string()),
            ..gateway_args()
        };
        let rendered = format!("{args:?}");
        assert!(!rendered.contains("mb_key"));
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn call_with_invalid_json_is_an_argument_error() {
        let code = run(
            gateway_args(),
            McpCommands::Call {
                name: "list_dashboards".to_string(),
                args: "{".to_string(),
            },
        )
        .await;
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn call_without_configuration_exits_with_2() {
        let code = run(
            GatewayArgs::default(),
            McpCommands::Call {
                name: "list_dashboards".to_string(),
                args: "{}".to_string(),
            },
        )
        .await;
        assert_eq!(code, 2);
    }
}
