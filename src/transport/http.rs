//! HTTP transport with Streamable HTTP support for the MCP server.

use crate::db::ConnectionGateway;
use crate::error::{GatewayError, GatewayResult};
use crate::mcp::GatewayService;
use crate::secure_log;
use crate::transport::{Transport, wait_for_signal};
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// How long open SSE streams may delay shutdown.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP transport implementation with Streamable HTTP support.
///
/// Every session gets its own [`GatewayService`], all sharing one gateway and
/// therefore one database connection.
pub struct HttpTransport {
    gateway: Arc<ConnectionGateway>,
    reference_doc: PathBuf,
    host: String,
    port: u16,
    /// MCP endpoint path
    endpoint: String,
}

impl HttpTransport {
    pub fn new(
        gateway: Arc<ConnectionGateway>,
        reference_doc: impl Into<PathBuf>,
        host: impl Into<String>,
        port: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            reference_doc: reference_doc.into(),
            host: host.into(),
            port,
            endpoint: endpoint.into(),
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the MCP endpoint path.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> GatewayResult<()> {
        let bind_addr = self.bind_addr();
        secure_log!(info, "Starting MCP server with HTTP transport", bind = bind_addr);

        let gateway = self.gateway.clone();
        let reference_doc = self.reference_doc.clone();
        let service = StreamableHttpService::new(
            move || Ok(GatewayService::new(gateway.clone(), reference_doc.clone())),
            LocalSessionManager::default().into(),
            Default::default(),
        );

        // nest_service doesn't support the root path
        let app = if self.endpoint == "/" {
            axum::Router::new().fallback_service(service)
        } else {
            axum::Router::new().nest_service(&self.endpoint, service)
        };

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            GatewayError::internal(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        secure_log!(info, "MCP endpoint ready", endpoint = self.endpoint);

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();
        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        let mut outcome = Ok(());
        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => secure_log!(info, "HTTP server stopped"),
                    Err(e) => {
                        secure_log!(error, "HTTP server error", error = e);
                        outcome = Err(GatewayError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                secure_log!(
                    info,
                    "Waiting for connections to close (send signal again to force exit)...",
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs()
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        secure_log!(warn, "Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        secure_log!(warn, "Received second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        secure_log!(info, "Closing database connection");
        self.gateway.close().await;

        outcome
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
