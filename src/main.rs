//! procgate CLI Entry Point
//!
//! Three subcommands:
//! - `serve` - run the HTTP JSON-RPC endpoint
//! - `call` - resolve and invoke one method, print the response envelope
//! - `resolve` - resolve one method without invoking it (debugging aid)
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;

use procgate::rpc::{error_response, success_response, ResponseMeta};
use procgate::{Gateway, GatewayError, GatewaySettings, MethodCall};

/// procgate - PostgreSQL stored procedures as a JSON-RPC endpoint
#[derive(Parser)]
#[command(name = "procgate")]
#[command(about = "Expose PostgreSQL stored procedures as a JSON-RPC API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP JSON-RPC endpoint
    Serve {
        /// Service name looked up in pg_service.conf
        #[arg(long)]
        service: String,

        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,

        /// Role to connect as, overriding the service file's user
        #[arg(long)]
        user: Option<String>,

        /// Number of database workers
        #[arg(long, default_value_t = 4)]
        pool_size: usize,

        /// Reconnect backoff schedule in seconds, comma-separated
        #[arg(long, value_delimiter = ',')]
        backoff: Option<Vec<u64>>,
    },

    /// Resolve and invoke one method, print the response envelope
    Call {
        /// Method name, optionally namespace-qualified
        method: String,

        /// Named arguments as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        /// Service name looked up in pg_service.conf
        #[arg(long)]
        service: String,

        /// Role to connect as, overriding the service file's user
        #[arg(long)]
        user: Option<String>,

        /// Origin reported as the implicit _host argument
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Resolve one method without invoking it
    Resolve {
        /// Method name, optionally namespace-qualified
        method: String,

        /// Named arguments as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        /// Service name looked up in pg_service.conf
        #[arg(long)]
        service: String,

        /// Role to connect as, overriding the service file's user
        #[arg(long)]
        user: Option<String>,

        /// Origin reported as the implicit _host argument
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("procgate=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { service, listen, user, pool_size, backoff } => {
            let settings = GatewaySettings::new(service)
                .with_user(user)
                .with_pool_size(pool_size)
                .with_backoff(
                    backoff
                        .map(|secs| secs.into_iter().map(Duration::from_secs).collect())
                        .unwrap_or_else(procgate::config::default_backoff),
                );

            let gateway = match Gateway::new(settings) {
                Ok(gateway) => Arc::new(gateway),
                Err(e) => return print_error(&e),
            };

            if let Err(e) = procgate::http::serve(listen, gateway).await {
                tracing::error!(error = %e, "server terminated");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }

        Commands::Call { method, params, service, user, host } => {
            let (gateway, call) = match one_shot(&method, &params, service, user, host) {
                Ok(pair) => pair,
                Err(e) => return print_error(&e),
            };
            let meta = ResponseMeta::from(&call);

            match gateway.call(&call).await {
                Ok(result) => {
                    println!("{}", success_response(&meta, result));
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    let payload = gateway.error_payload(&call, &e).await;
                    println!("{}", error_response(&meta, payload));
                    ExitCode::FAILURE
                }
            }
        }

        Commands::Resolve { method, params, service, user, host } => {
            let (gateway, call) = match one_shot(&method, &params, service, user, host) {
                Ok(pair) => pair,
                Err(e) => return print_error(&e),
            };

            match gateway.resolve(&call).await {
                Ok(resolved) => {
                    println!(
                        "{}",
                        serde_json::to_value(&resolved)
                            .unwrap_or_else(|_| json!({"error": "unserialisable"}))
                    );
                    ExitCode::SUCCESS
                }
                Err(e) => print_error(&e),
            }
        }
    }
}

/// Build the gateway and the call for the one-shot subcommands
fn one_shot(
    method: &str,
    params: &str,
    service: String,
    user: Option<String>,
    host: String,
) -> Result<(Gateway, MethodCall), GatewayError> {
    let params: serde_json::Map<String, serde_json::Value> = serde_json::from_str(params)
        .map_err(|e| GatewayError::invalid_request(format!("--params is not a JSON object: {e}")))?;

    let settings = GatewaySettings::new(service).with_user(user).with_pool_size(1);
    let gateway = Gateway::new(settings)?;
    Ok((gateway, MethodCall::new(method, params, host)))
}

/// Print a JSON error envelope to stdout and fail
fn print_error(error: &GatewayError) -> ExitCode {
    let payload = json!({ "code": error.jsonrpc_code(), "message": error.message() });
    println!("{}", error_response(&ResponseMeta::default(), payload));
    ExitCode::FAILURE
}
