//! Stdio transport for the MCP server.
//!
//! This transport uses standard input/output for communication,
//! which is the standard mode for CLI-based MCP integrations.

use crate::db::ConnectionGateway;
use crate::error::{GatewayError, GatewayResult};
use crate::mcp::GatewayService;
use crate::secure_log;
use crate::transport::{Transport, stop_tunnel, wait_for_signal};
use rmcp::{ServiceExt, transport::stdio};
use std::path::PathBuf;
use std::sync::Arc;

/// Stdio transport implementation.
///
/// This transport reads JSON-RPC messages from stdin and writes
/// responses to stdout, following the MCP protocol specification.
pub struct StdioTransport {
    gateway: Arc<ConnectionGateway>,
    reference_doc: PathBuf,
}

impl StdioTransport {
    /// Create a new stdio transport.
    ///
    /// # Arguments
    ///
    /// * `gateway` - Shared connection gateway, closed when the transport stops
    /// * `reference_doc` - Markdown file served by `get_reference_doc`
    pub fn new(gateway: Arc<ConnectionGateway>, reference_doc: impl Into<PathBuf>) -> Self {
        Self {
            gateway,
            reference_doc: reference_doc.into(),
        }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> GatewayResult<()> {
        secure_log!(info, "Starting MCP server with stdio transport");

        let service = GatewayService::new(self.gateway.clone(), self.reference_doc.clone());
        let running_service = service.serve(stdio()).await.map_err(|e| {
            GatewayError::internal(format!("Failed to start stdio transport: {}", e))
        })?;

        let mut outcome = Ok(());
        let shutdown_requested = tokio::select! {
            result = running_service.waiting() => {
                match result {
                    Ok(_quit_reason) => secure_log!(info, "Stdio transport completed normally"),
                    Err(e) => {
                        secure_log!(warn, "Stdio transport error", error = e);
                        outcome = Err(GatewayError::internal(format!("Stdio transport error: {}", e)));
                    }
                }
                false
            }
            _ = wait_for_signal() => {
                secure_log!(info, "Shutdown signal received (send again to force exit)");
                true
            }
        };

        if shutdown_requested {
            let gateway = self.gateway.clone();
            tokio::spawn(async move {
                wait_for_signal().await;
                secure_log!(warn, "Received second signal, forcing immediate exit");
                // process::exit skips kill_on_drop
                stop_tunnel(&gateway).await;
                std::process::exit(1);
            });
        }

        // The tunnel child must not outlive the server, even on transport errors
        secure_log!(info, "Closing database connection");
        self.gateway.close().await;

        if shutdown_requested {
            // tokio::select! cannot interrupt blocking stdin reads
            secure_log!(info, "Exiting process");
            std::process::exit(0);
        }

        outcome
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}
