//! Schema-related data models.
//!
//! This module defines types for table discovery and introspection.

use super::query::ColumnMetadata;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// URI scheme of table resources.
pub const RESOURCE_SCHEME: &str = "mysql://";

/// Path suffix of table resources.
pub const RESOURCE_SUFFIX: &str = "/data";

/// Type of database table object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    Table,
    View,
    SystemView,
}

impl TableType {
    /// Parse the `TABLE_TYPE` column of `information_schema.TABLES`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "view" => Self::View,
            "system view" => Self::SystemView,
            _ => Self::Table,
        }
    }

    pub fn is_view(self) -> bool {
        matches!(self, Self::View | Self::SystemView)
    }
}

impl std::fmt::Display for TableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::View => write!(f, "view"),
            Self::SystemView => write!(f, "system_view"),
        }
    }
}

/// A table exposed as an MCP resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub table_name: String,
    pub table_type: TableType,
    /// Estimate from `information_schema`; absent for views
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ResourceDescriptor {
    /// Create a descriptor for a table.
    pub fn new(table_name: impl Into<String>, table_type: TableType) -> Self {
        let table_name = table_name.into();
        Self {
            uri: resource_uri(&table_name),
            table_name,
            table_type,
            row_count: None,
            comment: None,
        }
    }

    /// Set the estimated row count.
    pub fn with_row_count(mut self, row_count: u64) -> Self {
        self.row_count = Some(row_count);
        self
    }

    /// Set the table comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Human-readable description for resource listings.
    pub fn description(&self) -> String {
        let mut text = match self.table_type {
            TableType::Table => format!("Data in table: {}", self.table_name),
            _ => format!("Data in {}: {}", self.table_type, self.table_name),
        };
        if let Some(rows) = self.row_count {
            text.push_str(&format!(" (~{} rows)", rows));
        }
        if let Some(comment) = &self.comment {
            text.push_str(&format!(" - {}", comment));
        }
        text
    }
}

/// Build the resource URI for a table.
pub fn resource_uri(table_name: &str) -> String {
    format!("{}{}{}", RESOURCE_SCHEME, table_name, RESOURCE_SUFFIX)
}

/// Contents of a table resource: a bounded preview of its rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePreview {
    pub table_name: String,
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    pub row_count: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Full type (e.g., `varchar(30)`, `bigint unsigned`)
    pub data_type: String,
    pub nullable: bool,
    /// Default value with appropriate JSON type based on column data type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<JsonValue>,
    pub is_primary_key: bool,
    /// e.g. `auto_increment`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnDefinition {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            default_value: None,
            is_primary_key: false,
            extra: None,
            comment: None,
        }
    }

    /// Set whether this is a primary key column.
    pub fn with_primary_key(mut self, is_pk: bool) -> Self {
        self.is_primary_key = is_pk;
        self
    }

    /// Set the default value from a string, converting to appropriate JSON type
    /// based on the column's data_type.
    pub fn with_default_str(mut self, default_str: &str) -> Self {
        self.default_value = Some(parse_default_value(default_str, &self.data_type));
        self
    }

    /// Set the extra attributes.
    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    /// Set the column comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    /// Create a new table schema.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Add a column definition, tracking primary key membership.
    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.push_column(column);
        self
    }

    pub fn push_column(&mut self, column: ColumnDefinition) {
        if column.is_primary_key {
            self.primary_key.push(column.name.clone());
        }
        self.columns.push(column);
    }
}

/// Column definitions plus the first few rows of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSample {
    pub table_name: String,
    pub columns: Vec<ColumnDefinition>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    pub sample_size: usize,
}

/// Parse a default value string into the appropriate JSON type based on column data type.
///
/// - Integer types (int, bigint, smallint, tinyint) → JSON Number
/// - Float types (float, double) → JSON Number
/// - `tinyint(1)`/bool → JSON Number (MySQL stores booleans as integers)
/// - JSON → Parsed JSON value
/// - Decimal → JSON String (preserve precision)
/// - Everything else, including expressions like `CURRENT_TIMESTAMP` → JSON String
pub fn parse_default_value(default_str: &str, data_type: &str) -> JsonValue {
    let dt_lower = data_type.to_lowercase();

    if dt_lower.contains("int") && !dt_lower.contains("point") {
        if let Ok(n) = default_str.parse::<i64>() {
            return JsonValue::Number(n.into());
        }
    }

    if (dt_lower.contains("float") || dt_lower.contains("double")) && !dt_lower.contains("decimal")
    {
        if let Ok(n) = default_str.parse::<f64>() {
            if let Some(num) = serde_json::Number::from_f64(n) {
                return JsonValue::Number(num);
            }
        }
    }

    if dt_lower == "json" {
        if let Ok(parsed) = serde_json::from_str(default_str) {
            return parsed;
        }
    }

    JsonValue::String(default_str.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_type_parsing() {
        assert_eq!(TableType::parse("BASE TABLE"), TableType::Table);
        assert_eq!(TableType::parse("VIEW"), TableType::View);
        assert_eq!(TableType::parse("SYSTEM VIEW"), TableType::SystemView);
        assert!(TableType::View.is_view());
        assert!(!TableType::Table.is_view());
    }

    #[test]
    fn test_resource_descriptor_uri() {
        let resource = ResourceDescriptor::new("orders", TableType::Table);
        assert_eq!(resource.uri, "mysql://orders/data");
    }

    #[test]
    fn test_resource_description() {
        let table = ResourceDescriptor::new("orders", TableType::Table)
            .with_row_count(1200)
            .with_comment("customer orders");
        assert_eq!(
            table.description(),
            "Data in table: orders (~1200 rows) - customer orders"
        );

        let view = ResourceDescriptor::new("active_users", TableType::View);
        assert_eq!(view.description(), "Data in view: active_users");
    }

    #[test]
    fn test_resource_serialization_without_optional_fields() {
        let resource = ResourceDescriptor::new("users", TableType::Table);
        let json = serde_json::to_string(&resource).unwrap();
        assert!(!json.contains("row_count"));
        assert!(!json.contains("comment"));
        assert!(json.contains("\"table_type\":\"table\""));
    }

    #[test]
    fn test_table_schema_tracks_primary_key() {
        let schema = TableSchema::new("users")
            .with_column(ColumnDefinition::new("id", "bigint", false).with_primary_key(true))
            .with_column(ColumnDefinition::new("name", "varchar(100)", true));

        assert_eq!(schema.columns.len(), 2);
        assert_eq!(schema.primary_key, vec!["id".to_string()]);
    }

    #[test]
    fn test_parse_default_value_types() {
        assert_eq!(
            parse_default_value("0", "tinyint unsigned"),
            JsonValue::Number(0.into())
        );
        assert_eq!(parse_default_value("42", "int"), JsonValue::Number(42.into()));
        assert_eq!(
            parse_default_value("1.5", "double"),
            serde_json::json!(1.5)
        );
        assert_eq!(
            parse_default_value("10.00", "decimal(10,2)"),
            JsonValue::String("10.00".to_string())
        );
        assert_eq!(
            parse_default_value("CURRENT_TIMESTAMP", "datetime"),
            JsonValue::String("CURRENT_TIMESTAMP".to_string())
        );
        assert_eq!(
            parse_default_value("{\"a\":1}", "json"),
            serde_json::json!({"a": 1})
        );
        assert_eq!(
            parse_default_value("POINT(0 0)", "point"),
            JsonValue::String("POINT(0 0)".to_string())
        );
    }
}
