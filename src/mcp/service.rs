//! MCP service implementation using rmcp.
//!
//! Tables are exposed as resources (`mysql://<table>/data`); SQL execution and
//! introspection are exposed as tools. Tool failures are reported as error
//! results with a secret-free message rather than protocol errors.

use crate::db::{ConnectionGateway, SchemaCatalog};
use crate::error::{GatewayError, GatewayResult};
use crate::models::ResourceDescriptor;
use crate::secure_log;
use crate::tools::schema::{SchemaInfoInput, SchemaToolHandler, TableSampleInput};
use crate::tools::sql::{ExecuteSqlInput, QueryExecutor};
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{
        AnnotateAble, CallToolResult, Content, Implementation, ListResourcesResult,
        PaginatedRequestParam, ProtocolVersion, RawResource, ReadResourceRequestParam,
        ReadResourceResult, Resource, ResourceContents, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Text returned by `get_reference_doc` when the document cannot be read.
pub const REFERENCE_DOC_UNAVAILABLE: &str = "Reference documentation not available.";

const JSON_MIME: &str = "application/json";

#[derive(Clone)]
pub struct GatewayService {
    gateway: Arc<ConnectionGateway>,
    catalog: SchemaCatalog,
    executor: QueryExecutor,
    schema_tools: SchemaToolHandler,
    reference_doc: PathBuf,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl GatewayService {
    /// Create a service over a shared gateway.
    ///
    /// # Arguments
    ///
    /// * `gateway` - The connection gateway shared with the transport (closed on shutdown)
    /// * `reference_doc` - Markdown file served by `get_reference_doc`
    pub fn new(gateway: Arc<ConnectionGateway>, reference_doc: impl Into<PathBuf>) -> Self {
        let catalog = SchemaCatalog::new(Arc::clone(&gateway));
        Self {
            executor: QueryExecutor::new(Arc::clone(&gateway)),
            schema_tools: SchemaToolHandler::new(catalog.clone()),
            catalog,
            gateway,
            reference_doc: reference_doc.into(),
            tool_router: Self::tool_router(),
        }
    }

    pub fn gateway(&self) -> &Arc<ConnectionGateway> {
        &self.gateway
    }

    async fn load_reference_doc(&self) -> String {
        match tokio::fs::read_to_string(&self.reference_doc).await {
            Ok(text) => text,
            Err(e) => {
                secure_log!(
                    warn,
                    "Reference documentation unavailable",
                    path = self.reference_doc.display(),
                    error = e
                );
                REFERENCE_DOC_UNAVAILABLE.to_string()
            }
        }
    }
}

/// Render a tool outcome: JSON text on success, an error result otherwise.
fn tool_result<T: Serialize>(outcome: GatewayResult<T>) -> Result<CallToolResult, McpError> {
    match outcome {
        Ok(value) => {
            let text = serde_json::to_string_pretty(&value)
                .map_err(|e| McpError::internal_error(e.to_string(), None))?;
            Ok(CallToolResult::success(vec![Content::text(text)]))
        }
        Err(err) => Ok(CallToolResult::error(vec![Content::text(error_text(&err))])),
    }
}

fn error_text(err: &GatewayError) -> String {
    match err.suggestion() {
        Some(hint) => format!("Error: {}\nSuggestion: {}", err, hint),
        None => format!("Error: {}", err),
    }
}

fn to_resource(descriptor: &ResourceDescriptor) -> Resource {
    let mut raw = RawResource::new(&descriptor.uri, &descriptor.table_name);
    raw.description = Some(descriptor.description());
    raw.mime_type = Some(JSON_MIME.to_string());
    raw.no_annotation()
}

#[tool_router]
impl GatewayService {
    #[tool(
        description = "Execute a SQL statement on the configured MySQL database.\nRead statements (SELECT, SHOW, DESCRIBE, EXPLAIN, WITH, ...) return columns and rows, truncated at the configured row limit.\nAny other statement runs in a transaction and is committed; the result reports rows affected and the last insert id.\nOutput format: json (default), table, or markdown."
    )]
    async fn execute_sql(
        &self,
        Parameters(input): Parameters<ExecuteSqlInput>,
    ) -> Result<CallToolResult, McpError> {
        tool_result(self.executor.execute(input).await)
    }

    #[tool(
        description = "Describe table columns: type, nullability, default, key and comment.\nOmit table_name to describe every table in the database."
    )]
    async fn get_schema_info(
        &self,
        Parameters(input): Parameters<SchemaInfoInput>,
    ) -> Result<CallToolResult, McpError> {
        tool_result(self.schema_tools.schema_info(input).await)
    }

    #[tool(
        description = "Return column definitions and the first rows of a table.\nlimit defaults to 5 and is capped at 20."
    )]
    async fn get_table_sample(
        &self,
        Parameters(input): Parameters<TableSampleInput>,
    ) -> Result<CallToolResult, McpError> {
        tool_result(self.schema_tools.table_sample(input).await)
    }

    #[tool(description = "Return the usage guide for this server's tools and resources.")]
    async fn get_reference_doc(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(
            self.load_reference_doc().await,
        )]))
    }
}

#[tool_handler]
impl ServerHandler for GatewayService {
    fn get_info(&self) -> ServerInfo {
        let mut instructions = String::from(
            "MySQL database access.\n\
            \n\
            ## Resources\n\
            Every table of the configured database is a resource `mysql://<table>/data`;\n\
            reading it returns up to 100 rows as JSON.\n\
            \n\
            ## Tools\n\
            - `get_schema_info`: column definitions for one or all tables\n\
            - `get_table_sample`: columns plus a few rows of a table\n\
            - `execute_sql`: run a statement; writes are committed immediately\n\
            - `get_reference_doc`: detailed usage guide",
        );
        if self.executor.is_read_only() {
            instructions.push_str("\n\nThis server is read-only: only read statements are accepted.");
        }

        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_owned(),
                title: Some("MySQL MCP Gateway".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(instructions),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let descriptors = self.catalog.list_resources().await.map_err(|e| {
            secure_log!(error, "Failed to list resources", error = e);
            McpError::from(e)
        })?;
        Ok(ListResourcesResult::with_all_items(
            descriptors.iter().map(to_resource).collect(),
        ))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let preview = self.catalog.read_resource(&request.uri).await.map_err(|e| {
            secure_log!(warn, "Failed to read resource", uri = request.uri, error = e);
            McpError::from(e)
        })?;
        let text = serde_json::to_string_pretty(&preview)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, request.uri)],
        })
    }
}
