//! QA DB MCP Server - Main entry point.

use qa_db_mcp_server::config::{Config, TransportMode};
use qa_db_mcp_server::db::{ConnectionFactory, ProfileRegistry, QueryExecutor};
use qa_db_mcp_server::models::TunnelMode;
use qa_db_mcp_server::transport::{HttpTransport, StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber. Logs go to stderr; stdout belongs to
/// the stdio transport.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);

    info!(
        transport = %config.transport,
        "Starting QA DB MCP Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let registry = match ProfileRegistry::from_env(&config) {
        Ok(registry) => Arc::new(registry),
        Err(message) => {
            eprintln!("Error: {}", message);
            eprintln!();
            eprintln!("Usage: qa-db-mcp-server --profile <name>[=<ENV_PREFIX>] ...");
            eprintln!();
            eprintln!("Each profile reads <PREFIX>_HOST, <PREFIX>_PORT, <PREFIX>_DATABASE,");
            eprintln!("<PREFIX>_USER and <PREFIX>_PASSWORD. The prefix defaults to the");
            eprintln!("upper-cased profile name.");
            eprintln!();
            eprintln!("Example:");
            eprintln!("  qa-db-mcp-server --profile gateway=MYSQL --profile evp_lt");
            std::process::exit(1);
        }
    };

    let tunnel_mode = config.tunnel_mode();
    match &tunnel_mode {
        TunnelMode::Direct => info!("SSH tunnel disabled; connecting directly"),
        TunnelMode::Ssh(tunnel) => info!(
            ssh_host = %tunnel.ssh_host,
            ssh_port = tunnel.ssh_port,
            ssh_user = %tunnel.ssh_user,
            "SSH tunnel enabled"
        ),
        TunnelMode::Misconfigured { missing } => warn!(
            missing = ?missing,
            "SSH tunnel enabled but configuration incomplete; database calls will fail"
        ),
    }

    let executor = Arc::new(QueryExecutor::new(ConnectionFactory::mysql(
        registry,
        tunnel_mode,
    )));

    let result = match config.transport {
        TransportMode::Stdio => {
            let transport = StdioTransport::new(executor);
            transport.run().await
        }
        TransportMode::Http => {
            info!(
                host = %config.http_host,
                port = config.http_port,
                endpoint = %config.mcp_endpoint,
                "Using HTTP transport"
            );
            let transport = HttpTransport::new(
                executor,
                &config.http_host,
                config.http_port,
                &config.mcp_endpoint,
            );
            transport.run().await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
