//! MCP tool implementations.
//!
//! - `sql`: `execute_sql`, statement classification and read-only enforcement
//! - `schema`: `get_schema_info` and `get_table_sample`
//! - `format`: table and markdown rendering of result sets

pub mod format;
pub mod schema;
pub mod sql;

pub use format::OutputFormat;
pub use schema::{
    SchemaInfoInput, SchemaInfoOutput, SchemaToolHandler, TableSampleInput, TableSampleOutput,
};
pub use sql::{ExecuteSqlInput, ExecuteSqlOutput, QueryExecutor, StatementKind};
