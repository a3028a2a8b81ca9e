//! MySQL MCP gateway - main entry point.
//!
//! Exposes one MySQL database to MCP clients over stdio or HTTP, optionally
//! reaching it through an SSH local-forwarding tunnel.

use mysql_mcp_gateway::config::{Config, ConnectionSettings, TransportMode};
use mysql_mcp_gateway::db::ConnectionGateway;
use mysql_mcp_gateway::logging::install_redactor;
use mysql_mcp_gateway::secure_log;
use mysql_mcp_gateway::transport::{HttpTransport, StdioTransport, Transport};
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs never go to stdout: the stdio transport owns it.
fn init_tracing(config: &Config) -> std::io::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (writer, ansi) = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(writer))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let config = Config::parse_args();

    if let Err(e) = init_tracing(&config) {
        eprintln!("Error: cannot open log file: {}", e);
        std::process::exit(1);
    }

    // Resolve everything before touching the network
    let settings = match ConnectionSettings::resolve() {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            secure_log!(error, "Invalid configuration", error = e);
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("Required: MYSQL_HOST, MYSQL_USER, MYSQL_PASSWORD, MYSQL_DATABASE");
            eprintln!("Optional: MYSQL_PORT, MYSQL_CHARSET, MYSQL_COLLATION, MYSQL_SQL_MODE");
            eprintln!("SSH tunnel: MYSQL_SSH_ENABLE=true with MYSQL_SSH_HOST, MYSQL_SSH_USER,");
            eprintln!("            MYSQL_SSH_KEY_PATH, MYSQL_SSH_REMOTE_HOST, MYSQL_SSH_REMOTE_PORT");
            std::process::exit(1);
        }
    };
    install_redactor(settings.redactor());

    secure_log!(
        info,
        format!("Starting MySQL MCP gateway v{}", env!("CARGO_PKG_VERSION")),
        transport = config.transport,
        host = settings.host,
        port = settings.port,
        database = settings.database,
        user = settings.user,
        ssh_tunnel = settings.ssh_enabled(),
        read_only = config.read_only
    );

    let gateway = Arc::new(ConnectionGateway::new(settings, config.gateway_options()));

    let result = match config.transport {
        TransportMode::Stdio => {
            let transport = StdioTransport::new(gateway, &config.reference_doc);
            transport.run().await
        }
        TransportMode::Http => {
            secure_log!(
                info,
                "Using HTTP transport",
                bind = config.http_bind_addr(),
                endpoint = config.mcp_endpoint
            );
            let transport = HttpTransport::new(
                gateway,
                &config.reference_doc,
                &config.http_host,
                config.http_port,
                &config.mcp_endpoint,
            );
            transport.run().await
        }
    };

    if let Err(e) = result {
        secure_log!(error, "Server error", error = e);
        return Err(e.into());
    }

    secure_log!(info, "Server shutdown complete");
    Ok(())
}
