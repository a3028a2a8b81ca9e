//! Data models for the MySQL MCP gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod query;
pub mod schema;

// Re-export commonly used types
pub use query::{ColumnMetadata, QueryParam, QueryResult, Statement, StatementKind};
pub use schema::{
    ColumnDefinition, ResourceDescriptor, TablePreview, TableSample, TableSchema, TableType,
    parse_default_value, resource_uri,
};
