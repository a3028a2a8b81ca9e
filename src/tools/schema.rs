//! Schema introspection tools.
//!
//! This module implements the `get_schema_info` and `get_table_sample` MCP tools.

use crate::db::SchemaCatalog;
use crate::db::catalog::{DEFAULT_SAMPLE_SIZE, MAX_SAMPLE_SIZE};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{ColumnDefinition, TableSample, TableSchema};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Input for the get_schema_info tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct SchemaInfoInput {
    /// Table to describe. Omit to describe every table in the database.
    #[serde(default)]
    pub table_name: Option<String>,
}

/// Input for the get_table_sample tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TableSampleInput {
    /// Table to sample
    pub table_name: String,
    /// Number of rows to return. Default: 5, max: 20
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ColumnOutput {
    pub name: String,
    /// Full type (e.g., `varchar(30)`, `bigint unsigned`)
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<JsonValue>,
    pub is_primary_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl From<ColumnDefinition> for ColumnOutput {
    fn from(col: ColumnDefinition) -> Self {
        Self {
            name: col.name,
            data_type: col.data_type,
            nullable: col.nullable,
            default_value: col.default_value,
            is_primary_key: col.is_primary_key,
            extra: col.extra,
            comment: col.comment,
        }
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct TableSchemaOutput {
    pub table_name: String,
    pub columns: Vec<ColumnOutput>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
}

impl From<TableSchema> for TableSchemaOutput {
    fn from(schema: TableSchema) -> Self {
        Self {
            table_name: schema.table_name,
            columns: schema.columns.into_iter().map(Into::into).collect(),
            primary_key: schema.primary_key,
        }
    }
}

/// Output from the get_schema_info tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SchemaInfoOutput {
    pub tables: Vec<TableSchemaOutput>,
    pub count: usize,
}

/// Output from the get_table_sample tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct TableSampleOutput {
    pub table_name: String,
    pub columns: Vec<ColumnOutput>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    pub sample_size: usize,
}

impl From<TableSample> for TableSampleOutput {
    fn from(sample: TableSample) -> Self {
        Self {
            table_name: sample.table_name,
            columns: sample.columns.into_iter().map(Into::into).collect(),
            rows: sample.rows,
            sample_size: sample.sample_size,
        }
    }
}

/// Handler for schema tools.
#[derive(Debug, Clone)]
pub struct SchemaToolHandler {
    catalog: SchemaCatalog,
}

impl SchemaToolHandler {
    pub fn new(catalog: SchemaCatalog) -> Self {
        Self { catalog }
    }

    /// Describe one table or every table.
    pub async fn schema_info(&self, input: SchemaInfoInput) -> GatewayResult<SchemaInfoOutput> {
        let table = non_blank(input.table_name.as_deref());
        let tables: Vec<TableSchemaOutput> = self
            .catalog
            .schema_info(table)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        Ok(SchemaInfoOutput {
            count: tables.len(),
            tables,
        })
    }

    /// Column definitions plus the first rows of a table.
    pub async fn table_sample(&self, input: TableSampleInput) -> GatewayResult<TableSampleOutput> {
        let table = non_blank(Some(&input.table_name))
            .ok_or_else(|| GatewayError::invalid_input("table_name must not be empty"))?;
        let limit = validate_sample_limit(input.limit)?;
        Ok(self.catalog.table_sample(table, Some(limit)).await?.into())
    }
}

fn non_blank(name: Option<&str>) -> Option<&str> {
    name.map(str::trim).filter(|n| !n.is_empty())
}

fn validate_sample_limit(limit: Option<u32>) -> GatewayResult<u32> {
    match limit {
        None => Ok(DEFAULT_SAMPLE_SIZE),
        Some(0) => Err(GatewayError::invalid_input("limit must be at least 1")),
        Some(n) => Ok(n.min(MAX_SAMPLE_SIZE)),
    }
}
