//! Table discovery and introspection.
//!
//! [`SchemaCatalog`] answers resource listings and reads, plus the schema-info
//! and table-sample tools, by querying `information_schema` for the current
//! database through the [`ConnectionGateway`].

use crate::db::gateway::ConnectionGateway;
use crate::db::types::{json_str, json_u64};
use crate::error::{GatewayError, GatewayResult};
use crate::models::schema::{RESOURCE_SCHEME, RESOURCE_SUFFIX};
use crate::models::{
    ColumnDefinition, ResourceDescriptor, Statement, TablePreview, TableSample, TableSchema,
    TableType,
};
use crate::secure_log;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Rows returned when reading a table resource.
pub const PREVIEW_ROW_LIMIT: u32 = 100;

/// Default and maximum rows for table samples.
pub const DEFAULT_SAMPLE_SIZE: u32 = 5;
pub const MAX_SAMPLE_SIZE: u32 = 20;

/// Upper bound on rows read from `information_schema`.
const CATALOG_ROW_LIMIT: u32 = 100_000;

type JsonRow = serde_json::Map<String, JsonValue>;

/// information_schema queries.
///
/// String columns are converted explicitly: depending on server charset
/// configuration MySQL may report them as VARBINARY.
mod queries {
    pub const LIST_TABLES: &str = r#"
        SELECT
            CONVERT(TABLE_NAME USING utf8mb4) AS TABLE_NAME,
            CONVERT(TABLE_TYPE USING utf8mb4) AS TABLE_TYPE,
            TABLE_ROWS,
            CONVERT(TABLE_COMMENT USING utf8mb4) AS TABLE_COMMENT
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = DATABASE()
        ORDER BY TABLE_NAME
        "#;

    pub const TABLE_COLUMNS: &str = r#"
        SELECT
            CONVERT(TABLE_NAME USING utf8mb4) AS TABLE_NAME,
            CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8mb4) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8mb4) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8mb4) AS COLUMN_DEFAULT,
            CONVERT(COLUMN_KEY USING utf8mb4) AS COLUMN_KEY,
            CONVERT(EXTRA USING utf8mb4) AS EXTRA,
            CONVERT(COLUMN_COMMENT USING utf8mb4) AS COLUMN_COMMENT
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
        "#;

    pub const ALL_COLUMNS: &str = r#"
        SELECT
            CONVERT(TABLE_NAME USING utf8mb4) AS TABLE_NAME,
            CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8mb4) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8mb4) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8mb4) AS COLUMN_DEFAULT,
            CONVERT(COLUMN_KEY USING utf8mb4) AS COLUMN_KEY,
            CONVERT(EXTRA USING utf8mb4) AS EXTRA,
            CONVERT(COLUMN_COMMENT USING utf8mb4) AS COLUMN_COMMENT
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = DATABASE()
        ORDER BY TABLE_NAME, ORDINAL_POSITION
        "#;
}

/// Read-only view of the current database's tables.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    gateway: Arc<ConnectionGateway>,
}

impl SchemaCatalog {
    pub fn new(gateway: Arc<ConnectionGateway>) -> Self {
        Self { gateway }
    }

    /// List every table and view of the current database as a resource.
    pub async fn list_resources(&self) -> GatewayResult<Vec<ResourceDescriptor>> {
        let result = self
            .gateway
            .execute(&Statement::read(queries::LIST_TABLES, CATALOG_ROW_LIMIT))
            .await?;

        let resources: Vec<_> = result.rows.iter().filter_map(resource_from_row).collect();
        secure_log!(debug, "Listed tables", count = resources.len());
        Ok(resources)
    }

    /// Read a bounded preview of the table behind a resource URI.
    pub async fn read_resource(&self, uri: &str) -> GatewayResult<TablePreview> {
        let table = parse_resource_uri(uri)?;
        let sql = format!(
            "SELECT * FROM {} LIMIT {}",
            quote_identifier(&table),
            PREVIEW_ROW_LIMIT + 1
        );

        let result = self
            .gateway
            .execute(&Statement::read(sql, PREVIEW_ROW_LIMIT))
            .await
            .map_err(|err| missing_table(err, &table))?;

        secure_log!(
            debug,
            "Read table resource",
            table = table,
            rows = result.rows.len(),
            truncated = result.truncated
        );
        Ok(TablePreview {
            table_name: table,
            row_count: result.rows.len(),
            columns: result.columns,
            rows: result.rows,
            truncated: result.truncated,
        })
    }

    /// Describe one table, or every table when `table` is `None`.
    pub async fn schema_info(&self, table: Option<&str>) -> GatewayResult<Vec<TableSchema>> {
        let statement = match table {
            Some(name) => {
                Statement::read(queries::TABLE_COLUMNS, CATALOG_ROW_LIMIT).with_param(name)
            }
            None => Statement::read(queries::ALL_COLUMNS, CATALOG_ROW_LIMIT),
        };
        let result = self.gateway.execute(&statement).await?;
        let schemas = group_columns(&result.rows);

        match table {
            Some(name) if schemas.is_empty() => Err(GatewayError::not_found(name)),
            _ => Ok(schemas),
        }
    }

    /// Column definitions plus the first `limit` rows of a table.
    pub async fn table_sample(&self, table: &str, limit: Option<u32>) -> GatewayResult<TableSample> {
        let limit = limit
            .unwrap_or(DEFAULT_SAMPLE_SIZE)
            .clamp(1, MAX_SAMPLE_SIZE);

        let columns = self
            .schema_info(Some(table))
            .await?
            .into_iter()
            .next()
            .map(|schema| schema.columns)
            .unwrap_or_default();

        let sql = format!("SELECT * FROM {} LIMIT {}", quote_identifier(table), limit);
        let result = self
            .gateway
            .execute(&Statement::read(sql, limit))
            .await
            .map_err(|err| missing_table(err, table))?;

        Ok(TableSample {
            table_name: table.to_string(),
            sample_size: result.rows.len(),
            columns,
            rows: result.rows,
        })
    }
}

/// Extract the table name from `mysql://<table>/data`.
pub fn parse_resource_uri(uri: &str) -> GatewayResult<String> {
    let table = uri
        .strip_prefix(RESOURCE_SCHEME)
        .and_then(|rest| rest.strip_suffix(RESOURCE_SUFFIX))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            GatewayError::invalid_input(format!(
                "Invalid resource URI '{}': expected {}<table>{}",
                uri, RESOURCE_SCHEME, RESOURCE_SUFFIX
            ))
        })?;
    Ok(table.to_string())
}

/// Quote a MySQL identifier with backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn missing_table(err: GatewayError, table: &str) -> GatewayError {
    if err.is_missing_table() {
        GatewayError::not_found(table)
    } else {
        err
    }
}

fn resource_from_row(row: &JsonRow) -> Option<ResourceDescriptor> {
    let name = json_str(row, "TABLE_NAME").filter(|n| !n.is_empty())?;
    let table_type = TableType::parse(&json_str(row, "TABLE_TYPE").unwrap_or_default());

    let mut resource = ResourceDescriptor::new(name, table_type);
    if !table_type.is_view() {
        if let Some(rows) = json_u64(row, "TABLE_ROWS") {
            resource = resource.with_row_count(rows);
        }
    }
    if let Some(comment) = json_str(row, "TABLE_COMMENT").filter(|c| !c.is_empty()) {
        // Views report the literal comment "VIEW"
        if !(table_type.is_view() && comment == "VIEW") {
            resource = resource.with_comment(comment);
        }
    }
    Some(resource)
}

fn column_from_row(row: &JsonRow) -> Option<ColumnDefinition> {
    let name = json_str(row, "COLUMN_NAME").filter(|n| !n.is_empty())?;
    let column_type = json_str(row, "COLUMN_TYPE").unwrap_or_default();
    let nullable = json_str(row, "IS_NULLABLE").is_some_and(|v| v == "YES");
    let is_pk = json_str(row, "COLUMN_KEY").is_some_and(|k| k == "PRI");

    let mut col = ColumnDefinition::new(name, column_type, nullable).with_primary_key(is_pk);
    if let Some(default) = json_str(row, "COLUMN_DEFAULT") {
        col = col.with_default_str(&default);
    }
    if let Some(extra) = json_str(row, "EXTRA").filter(|e| !e.is_empty()) {
        col = col.with_extra(extra);
    }
    if let Some(comment) = json_str(row, "COLUMN_COMMENT").filter(|c| !c.is_empty()) {
        col = col.with_comment(comment);
    }
    Some(col)
}

/// Group column rows (ordered by table) into per-table schemas.
fn group_columns(rows: &[JsonRow]) -> Vec<TableSchema> {
    let mut schemas: Vec<TableSchema> = Vec::new();
    for row in rows {
        let Some(table) = json_str(row, "TABLE_NAME") else {
            continue;
        };
        let Some(column) = column_from_row(row) else {
            continue;
        };
        match schemas.last_mut() {
            Some(schema) if schema.table_name == table => schema.push_column(column),
            _ => schemas.push(TableSchema::new(table).with_column(column)),
        }
    }
    schemas
}
