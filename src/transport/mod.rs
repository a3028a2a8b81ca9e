//! Transport layer for the MCP server.
//!
//! - Stdio: standard input/output for CLI integration
//! - HTTP: Streamable HTTP for networked clients
//!
//! Both close the database connection and stop the SSH tunnel on shutdown.

pub mod http;
pub mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

use crate::db::ConnectionGateway;
use crate::error::GatewayResult;
use crate::secure_log;
use std::future::Future;
use tokio::signal;

/// Trait for MCP transport implementations.
pub trait Transport: Send + Sync {
    /// Start the transport and serve requests until shutdown.
    fn run(&self) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub(crate) async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            secure_log!(warn, "Failed to listen for Ctrl+C", error = e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                secure_log!(warn, "Failed to install SIGTERM handler", error = e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => secure_log!(info, "Received SIGINT"),
        _ = terminate => secure_log!(info, "Received SIGTERM"),
    }
}

/// Stop the tunnel process without waiting on the database connection.
///
/// Used before `process::exit`, which skips destructors. Bounded so a tunnel
/// that is still starting cannot hold up the exit.
pub(crate) async fn stop_tunnel(gateway: &ConnectionGateway) {
    let limit = gateway.options().tunnel_teardown_timeout * 2;
    if tokio::time::timeout(limit, gateway.tunnel().shutdown())
        .await
        .is_err()
    {
        secure_log!(warn, "Timed out stopping SSH tunnel", timeout_secs = limit.as_secs());
    }
}
