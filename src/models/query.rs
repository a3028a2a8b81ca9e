//! Query-related data models.
//!
//! This module defines the statements handed to the gateway and the results it returns.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Leading keywords of statements that only read data.
const READ_KEYWORDS: &[&str] = &[
    "SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "WITH", "VALUES", "TABLE", "HELP",
];

/// Words that make a statement write even when it starts like a read,
/// e.g. `WITH ... DELETE` or `SELECT ... INTO OUTFILE`.
const WRITE_CLAUSE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "REPLACE", "OUTFILE", "DUMPFILE",
];

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Whether a statement reads or may modify data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Read,
    Mutating,
}

impl StatementKind {
    /// Classify a statement by its leading keyword.
    ///
    /// Anything that is not recognisably a read (batches, leading comments,
    /// unknown keywords) is treated as mutating and gets committed.
    pub fn classify(sql: &str) -> Self {
        let trimmed = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        if trimmed.contains(';') {
            return Self::Mutating;
        }

        let keyword = trimmed
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or_default();

        if READ_KEYWORDS
            .iter()
            .any(|k| k.eq_ignore_ascii_case(keyword))
        {
            Self::Read
        } else {
            Self::Mutating
        }
    }

    pub fn is_read(self) -> bool {
        self == Self::Read
    }

    /// True if `sql` contains a data-writing clause anywhere outside quotes.
    ///
    /// `REPLACE(` and `INSERT(` are string functions and `FOR UPDATE` only
    /// locks, so neither counts. Comments are not skipped; a keyword inside
    /// one is reported as a write.
    pub fn has_write_clause(sql: &str) -> bool {
        let bytes = sql.as_bytes();
        let mut prev = "";
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                quote @ (b'\'' | b'"' | b'`') => i = skip_quoted(bytes, i, quote),
                c if c.is_ascii_alphabetic() || c == b'_' => {
                    let start = i;
                    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                        i += 1;
                    }
                    let word = &sql[start..i];
                    let is_call = sql[i..].trim_start().starts_with('(');
                    let is_lock =
                        word.eq_ignore_ascii_case("UPDATE") && prev.eq_ignore_ascii_case("FOR");
                    if !is_call
                        && !is_lock
                        && WRITE_CLAUSE_KEYWORDS
                            .iter()
                            .any(|k| k.eq_ignore_ascii_case(word))
                    {
                        return true;
                    }
                    prev = word;
                }
                _ => i += 1,
            }
        }
        false
    }
}

/// Index just past the literal or quoted identifier opening at `open`.
fn skip_quoted(bytes: &[u8], open: usize, quote: u8) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if quote != b'`' => i += 2,
            c if c == quote && bytes.get(i + 1) == Some(&quote) => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// A statement ready for the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<QueryParam>,
    pub kind: StatementKind,
    /// Rows to return for reads; one extra row is fetched to detect truncation
    pub row_limit: u32,
}

impl Statement {
    /// A read statement returning at most `row_limit` rows.
    pub fn read(sql: impl Into<String>, row_limit: u32) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            kind: StatementKind::Read,
            row_limit,
        }
    }

    /// A statement executed inside a transaction and committed.
    pub fn mutating(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            kind: StatementKind::Mutating,
            row_limit: 0,
        }
    }

    /// Add a parameter to this statement.
    pub fn with_param(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// MySQL type name as reported by the driver (e.g. "VARCHAR", "BIGINT UNSIGNED")
    pub type_name: String,
    pub nullable: bool,
}

impl ColumnMetadata {
    /// Create new column metadata.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<u64>,
    pub committed: bool,
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a result for a read statement.
    pub fn rows(
        columns: Vec<ColumnMetadata>,
        rows: Vec<serde_json::Map<String, JsonValue>>,
        truncated: bool,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            columns,
            rows,
            truncated,
            rows_affected: None,
            last_insert_id: None,
            committed: false,
            execution_time_ms,
        }
    }

    /// Create a result for a committed mutating statement.
    pub fn write_result(rows_affected: u64, last_insert_id: u64, execution_time_ms: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            truncated: false,
            rows_affected: Some(rows_affected),
            last_insert_id: (last_insert_id != 0).then_some(last_insert_id),
            committed: true,
            execution_time_ms,
        }
    }

    /// Get the number of rows in the result.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// True if the statement produced a row set rather than an affected-row count.
    pub fn has_rows(&self) -> bool {
        self.rows_affected.is_none()
    }
}
