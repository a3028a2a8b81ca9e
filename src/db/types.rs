//! MySQL value decoding.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the driver's column type name
//! 2. A per-category decoder extracts the value as JSON
//!
//! Values that cannot be decoded as their category fall back to text, then to
//! base64 bytes, so a row never fails to render.

use crate::models::ColumnMetadata;
use crate::secure_log;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo};

/// Logical category for MySQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Temporal,
    Binary,
    Json,
    Text,
}

/// Classify a MySQL type name (as reported by the driver) into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();
    let base = lower.trim_end_matches(" unsigned");

    if base == "decimal" || base == "numeric" {
        return TypeCategory::Decimal;
    }
    if base == "boolean" || base == "bool" {
        return TypeCategory::Boolean;
    }
    if base.ends_with("int") || base == "year" {
        return TypeCategory::Integer;
    }
    if base == "float" || base == "double" || base == "real" {
        return TypeCategory::Float;
    }
    if matches!(base, "date" | "datetime" | "timestamp" | "time") {
        return TypeCategory::Temporal;
    }
    if base == "json" {
        return TypeCategory::Json;
    }
    if base.contains("blob") || base.contains("binary") || base == "bit" || base == "geometry" {
        return TypeCategory::Binary;
    }

    TypeCategory::Text
}

/// Wrapper type for raw DECIMAL values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Encode binary data as a base64 JSON string.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;
    fn column_metadata(&self) -> Vec<ColumnMetadata>;
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                (col.name().to_string(), decode_column(self, idx, category))
            })
            .collect()
    }

    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        self.columns()
            .iter()
            .map(|col| {
                ColumnMetadata::new(
                    col.name(),
                    col.type_info().name(),
                    !col.type_info().is_null(),
                )
            })
            .collect()
    }
}

fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
    if is_null(row, idx) {
        return JsonValue::Null;
    }
    let decoded = match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Temporal => decode_temporal(row, idx),
        TypeCategory::Json => decode_json(row, idx),
        TypeCategory::Binary => decode_bytes(row, idx),
        TypeCategory::Text => None,
    };
    decoded
        .or_else(|| decode_text(row, idx))
        .or_else(|| decode_bytes(row, idx))
        .unwrap_or(JsonValue::Null)
}

fn is_null(row: &MySqlRow, idx: usize) -> bool {
    row.try_get_raw(idx)
        .map(|value| sqlx::ValueRef::is_null(&value))
        .unwrap_or(false)
}

fn decode_decimal(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    match row.try_get::<RawDecimal, _>(idx) {
        Ok(v) => Some(JsonValue::String(v.0)),
        Err(e) => {
            secure_log!(debug, "Failed to decode DECIMAL", error = e);
            None
        }
    }
}

fn decode_integer(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Some(JsonValue::Number(v.into()));
    }
    if let Ok(v) = row.try_get::<u64, _>(idx) {
        return Some(JsonValue::Number(v.into()));
    }
    if let Ok(v) = row.try_get::<i32, _>(idx) {
        return Some(JsonValue::Number(v.into()));
    }
    if let Ok(v) = row.try_get::<u32, _>(idx) {
        return Some(JsonValue::Number(v.into()));
    }
    if let Ok(v) = row.try_get::<i16, _>(idx) {
        return Some(JsonValue::Number(v.into()));
    }
    if let Ok(v) = row.try_get::<u16, _>(idx) {
        return Some(JsonValue::Number(v.into()));
    }
    if let Ok(v) = row.try_get::<i8, _>(idx) {
        return Some(JsonValue::Number(v.into()));
    }
    if let Ok(v) = row.try_get::<u8, _>(idx) {
        return Some(JsonValue::Number(v.into()));
    }
    None
}

fn decode_boolean(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    row.try_get::<bool, _>(idx).ok().map(JsonValue::Bool)
}

fn decode_float(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    let value = row
        .try_get::<f64, _>(idx)
        .ok()
        .or_else(|| row.try_get::<f32, _>(idx).ok().map(f64::from))?;
    Some(
        serde_json::Number::from_f64(value)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(value.to_string())),
    )
}

fn decode_temporal(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
        return Some(JsonValue::String(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()));
    }
    if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
        return Some(JsonValue::String(v.to_rfc3339()));
    }
    if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
        return Some(JsonValue::String(v.to_string()));
    }
    if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
        return Some(JsonValue::String(v.to_string()));
    }
    None
}

fn decode_json(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    row.try_get::<JsonValue, _>(idx).ok()
}

fn decode_text(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    row.try_get::<String, _>(idx).ok().map(JsonValue::String)
}

fn decode_bytes(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    row.try_get::<Vec<u8>, _>(idx)
        .ok()
        .map(|bytes| encode_binary(&bytes))
}

/// Read a string field from a JSON row, accepting numbers as well.
pub fn json_str(row: &serde_json::Map<String, JsonValue>, column: &str) -> Option<String> {
    match row.get(column)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read an unsigned integer field from a JSON row.
pub fn json_u64(row: &serde_json::Map<String, JsonValue>, column: &str) -> Option<u64> {
    match row.get(column)? {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT"), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT UNSIGNED"), TypeCategory::Integer);
        assert_eq!(categorize_type("TINYINT"), TypeCategory::Integer);
        assert_eq!(categorize_type("MEDIUMINT"), TypeCategory::Integer);
        assert_eq!(categorize_type("YEAR"), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_type_other() {
        assert_eq!(categorize_type("DECIMAL"), TypeCategory::Decimal);
        assert_eq!(categorize_type("BOOLEAN"), TypeCategory::Boolean);
        assert_eq!(categorize_type("DOUBLE"), TypeCategory::Float);
        assert_eq!(categorize_type("DATETIME"), TypeCategory::Temporal);
        assert_eq!(categorize_type("TIMESTAMP"), TypeCategory::Temporal);
        assert_eq!(categorize_type("JSON"), TypeCategory::Json);
        assert_eq!(categorize_type("VARBINARY"), TypeCategory::Binary);
        assert_eq!(categorize_type("BLOB"), TypeCategory::Binary);
        assert_eq!(categorize_type("VARCHAR"), TypeCategory::Text);
        assert_eq!(categorize_type("TEXT"), TypeCategory::Text);
        assert_eq!(categorize_type("ENUM"), TypeCategory::Text);
    }

    #[test]
    fn test_geometry_is_not_integer() {
        assert_eq!(categorize_type("GEOMETRY"), TypeCategory::Binary);
        assert_ne!(categorize_type("POINT"), TypeCategory::Integer);
    }

    #[test]
    fn test_encode_binary() {
        assert_eq!(encode_binary(b"hello world"), json!("aGVsbG8gd29ybGQ="));
        assert_eq!(encode_binary(&[0xFF, 0xFE, 0x00, 0x01]), json!("//4AAQ=="));
        assert_eq!(encode_binary(&[]), json!(""));
    }

    #[test]
    fn test_json_field_helpers() {
        let row = json!({"TABLE_NAME": "users", "TABLE_ROWS": 12, "AS_TEXT": "34", "NOTHING": null});
        let row = row.as_object().unwrap();
        assert_eq!(json_str(row, "TABLE_NAME"), Some("users".to_string()));
        assert_eq!(json_str(row, "TABLE_ROWS"), Some("12".to_string()));
        assert_eq!(json_str(row, "NOTHING"), None);
        assert_eq!(json_u64(row, "TABLE_ROWS"), Some(12));
        assert_eq!(json_u64(row, "AS_TEXT"), Some(34));
        assert_eq!(json_u64(row, "MISSING"), None);
    }
}
