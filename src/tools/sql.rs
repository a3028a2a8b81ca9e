//! The `execute_sql` tool.
//!
//! Statements are classified by leading keyword. Reads return at most
//! `max_rows` rows with a truncation flag; everything else is committed and
//! reports affected rows. Read-only mode rejects mutating statements, and reads
//! carrying a write clause, before a connection is touched; connections it
//! opens are also read-only on the server side.

use crate::db::ConnectionGateway;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{ColumnMetadata, QueryResult, Statement};
pub use crate::models::StatementKind;
use crate::secure_log;
use crate::tools::format::{OutputFormat, render};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Input for the execute_sql tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteSqlInput {
    /// SQL statement to execute. Reads (SELECT, SHOW, DESCRIBE, EXPLAIN, WITH ...) return rows; anything else is committed.
    pub query: String,
    /// Output format: "json" returns structured data, "table" returns ASCII table, "markdown" returns markdown table
    #[serde(default)]
    pub format: OutputFormat,
}

/// Output from the execute_sql tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ExecuteSqlOutput {
    /// "read" or "mutating"
    pub statement_kind: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnMetadataOutput>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    /// Number of rows returned (reads only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    /// True if more than max_rows rows matched
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<u64>,
    pub committed: bool,
    /// Pre-formatted output when format is table or markdown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ColumnMetadataOutput {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
}

impl From<ColumnMetadata> for ColumnMetadataOutput {
    fn from(meta: ColumnMetadata) -> Self {
        Self {
            name: meta.name,
            type_name: meta.type_name,
            nullable: meta.nullable,
        }
    }
}

impl ExecuteSqlOutput {
    /// Build the tool output; text formats replace the structured rows.
    pub fn from_result(result: QueryResult, format: OutputFormat) -> Self {
        let formatted = render(&result, format);
        let kind = if result.committed {
            StatementKind::Mutating
        } else {
            StatementKind::Read
        };
        let row_count = result.has_rows().then(|| result.row_count());
        let (columns, rows) = if formatted.is_some() {
            (Vec::new(), Vec::new())
        } else {
            (
                result.columns.into_iter().map(Into::into).collect(),
                result.rows,
            )
        };

        Self {
            statement_kind: kind_name(kind).to_string(),
            columns,
            rows,
            row_count,
            truncated: result.truncated,
            rows_affected: result.rows_affected,
            last_insert_id: result.last_insert_id,
            committed: result.committed,
            formatted,
            execution_time_ms: result.execution_time_ms,
        }
    }
}

fn kind_name(kind: StatementKind) -> &'static str {
    match kind {
        StatementKind::Read => "read",
        StatementKind::Mutating => "mutating",
    }
}

/// Runs user SQL through the gateway.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    gateway: Arc<ConnectionGateway>,
    max_rows: u32,
    read_only: bool,
}

impl QueryExecutor {
    /// Create an executor using the gateway's row limit and read-only flag.
    pub fn new(gateway: Arc<ConnectionGateway>) -> Self {
        let max_rows = gateway.options().max_rows;
        let read_only = gateway.options().read_only;
        Self {
            gateway,
            max_rows,
            read_only,
        }
    }

    pub fn max_rows(&self) -> u32 {
        self.max_rows
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Validate and classify `sql` without running it.
    pub fn prepare(&self, sql: &str) -> GatewayResult<Statement> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(GatewayError::invalid_input("No SQL query provided"));
        }

        match StatementKind::classify(sql) {
            StatementKind::Read if self.read_only && StatementKind::has_write_clause(sql) => {
                Err(GatewayError::permission(
                    "execute_sql",
                    "the gateway is in read-only mode; the statement contains a data-writing \
                     clause (INSERT, UPDATE, DELETE, REPLACE or INTO OUTFILE/DUMPFILE)",
                ))
            }
            StatementKind::Read => Ok(Statement::read(sql, self.max_rows)),
            StatementKind::Mutating if self.read_only => Err(GatewayError::permission(
                "execute_sql",
                "the gateway is in read-only mode; only SELECT, SHOW, DESCRIBE, EXPLAIN and \
                 similar statements are allowed",
            )),
            StatementKind::Mutating => Ok(Statement::mutating(sql)),
        }
    }

    /// Run one statement.
    pub async fn run(&self, sql: &str) -> GatewayResult<QueryResult> {
        let statement = self.prepare(sql)?;
        let result = self.gateway.execute(&statement).await;

        match &result {
            Ok(r) if r.committed => secure_log!(
                info,
                "Statement committed",
                rows_affected = r.rows_affected.unwrap_or(0),
                elapsed_ms = r.execution_time_ms
            ),
            Ok(r) => secure_log!(
                info,
                "Query returned rows",
                rows = r.row_count(),
                truncated = r.truncated,
                elapsed_ms = r.execution_time_ms
            ),
            Err(err) => secure_log!(warn, "Statement failed", error = err),
        }
        result
    }

    /// Handle an execute_sql tool call.
    pub async fn execute(&self, input: ExecuteSqlInput) -> GatewayResult<ExecuteSqlOutput> {
        let result = self.run(&input.query).await?;
        Ok(ExecuteSqlOutput::from_result(result, input.format))
    }
}
