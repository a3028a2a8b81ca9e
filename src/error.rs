//! Error types for the MySQL MCP gateway.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Each variant carries a message that is safe to show to the host: driver and tunnel
//! messages are passed through the [`Redactor`](crate::logging::Redactor) before they
//! are stored here.

use sqlx::error::DatabaseError;
use sqlx::mysql::MySqlDatabaseError;
use thiserror::Error;

/// MySQL error codes that mean retrying with the same settings cannot succeed.
const TERMINAL_CONNECT_CODES: &[&str] = &["1044", "1045", "1049", "1698", "2059"];

/// MySQL `ER_NO_SUCH_TABLE`.
pub const ER_NO_SUCH_TABLE: &str = "1146";

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {variable} {reason}")]
    Configuration { variable: String, reason: String },

    #[error("SSH tunnel error: {message}")]
    Tunnel { message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// MySQL error number or SQLSTATE, when the server reported one
        sql_state: Option<String>,
        retryable: bool,
    },

    #[error("SQL error: {message}")]
    Query {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Permission denied: {operation} - {reason}")]
    Permission { operation: String, reason: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Create a configuration error naming the offending variable.
    pub fn configuration(variable: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            variable: variable.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error for a required variable that is unset or empty.
    pub fn missing_variable(variable: impl Into<String>) -> Self {
        Self::configuration(variable, "is required but not set")
    }

    /// Create a tunnel error.
    pub fn tunnel(message: impl Into<String>) -> Self {
        Self::Tunnel {
            message: message.into(),
        }
    }

    /// Create a connection-level database error.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        retryable: bool,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            retryable,
        }
    }

    /// Create a statement-level error.
    pub fn query(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a permission error.
    pub fn permission(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Permission {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get a hint for the host, if one applies.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Configuration { .. } => Some("Check the MYSQL_* environment variables"),
            Self::Tunnel { .. } => {
                Some("The tunnel will be re-established on the next request; check SSH settings if this persists")
            }
            Self::Database {
                retryable: true, ..
            } => Some("The connection will be reopened on the next request"),
            Self::Database {
                retryable: false, ..
            } => Some("Check the database credentials and database name"),
            Self::Query { .. } => Some("Check the SQL syntax and referenced objects, then resubmit"),
            Self::NotFound { .. } => Some("List resources again; the schema may have changed"),
            Self::Timeout { .. } => {
                Some("Consider increasing the timeout or optimizing the operation")
            }
            Self::Permission { .. } => Some("The gateway is running in read-only mode"),
            Self::InvalidInput { .. } | Self::Internal { .. } => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Retryable errors leave the gateway without a cached connection, so the
    /// next request reconnects (and re-establishes the tunnel if needed).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Tunnel { .. } | Self::Timeout { .. } => true,
            Self::Database { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Map a driver error raised while opening or probing a connection.
    pub fn from_connect(err: sqlx::Error, redact: impl Fn(&str) -> String) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = error_code(db_err.as_ref());
                let retryable = !code
                    .as_deref()
                    .is_some_and(|c| TERMINAL_CONNECT_CODES.contains(&c));
                GatewayError::database(redact(db_err.message()), code, retryable)
            }
            sqlx::Error::Configuration(msg) => {
                GatewayError::database(redact(&msg.to_string()), None, false)
            }
            sqlx::Error::Io(io_err) => {
                GatewayError::database(redact(&format!("I/O error: {}", io_err)), None, true)
            }
            sqlx::Error::Tls(tls_err) => {
                GatewayError::database(redact(&format!("TLS error: {}", tls_err)), None, true)
            }
            sqlx::Error::Protocol(msg) => {
                GatewayError::database(redact(&format!("Protocol error: {}", msg)), None, true)
            }
            other => GatewayError::database(redact(&other.to_string()), None, true),
        }
    }

    /// Map a driver error raised while running a statement.
    ///
    /// Server-reported errors keep their message verbatim (only the configured
    /// secrets are scrubbed). Transport failures become retryable database errors.
    pub fn from_statement(err: sqlx::Error, redact: impl Fn(&str) -> String) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = error_code(db_err.as_ref());
                GatewayError::query(redact(db_err.message()), code)
            }
            sqlx::Error::ColumnDecode { index, source } => GatewayError::internal(format!(
                "Failed to decode column {}: {}",
                index, source
            )),
            sqlx::Error::Decode(source) => GatewayError::internal(format!("Decode error: {}", source)),
            sqlx::Error::RowNotFound => GatewayError::query("No rows returned", None),
            other => Self::from_connect(other, redact),
        }
    }

    /// True if the connection must not be reused after this error.
    pub fn invalidates_connection(&self) -> bool {
        matches!(
            self,
            Self::Database { .. } | Self::Tunnel { .. } | Self::Timeout { .. }
        )
    }

    /// True if this is a statement error reporting a missing table.
    pub fn is_missing_table(&self) -> bool {
        match self {
            Self::Query { sql_state, .. } => sql_state
                .as_deref()
                .is_some_and(|c| c == ER_NO_SUCH_TABLE || c == "42S02"),
            _ => false,
        }
    }
}

/// Prefer the MySQL error number; fall back to SQLSTATE for other drivers.
fn error_code(db_err: &dyn DatabaseError) -> Option<String> {
    db_err
        .try_downcast_ref::<MySqlDatabaseError>()
        .map(|e| e.number().to_string())
        .or_else(|| db_err.code().map(|c| c.to_string()))
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Build suggestion data as JSON value.
fn suggestion_data(suggestion: Option<&str>) -> Option<serde_json::Value> {
    suggestion.map(|s| serde_json::json!({ "suggestion": s }))
}

/// Convert GatewayError to MCP ErrorData for semantic error categorization.
/// Includes the suggestion field in the `data` object when available.
impl From<GatewayError> for rmcp::ErrorData {
    fn from(err: GatewayError) -> Self {
        let data = suggestion_data(err.suggestion());
        match &err {
            GatewayError::InvalidInput { .. } | GatewayError::Permission { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), data)
            }

            GatewayError::NotFound { .. } => {
                rmcp::ErrorData::resource_not_found(err.to_string(), data)
            }

            GatewayError::Query { message, sql_state } => {
                let msg = match sql_state {
                    Some(code) => format!("SQL error: {} (code: {})", message, code),
                    None => err.to_string(),
                };
                rmcp::ErrorData::invalid_params(msg, data)
            }

            GatewayError::Configuration { .. }
            | GatewayError::Tunnel { .. }
            | GatewayError::Database { .. }
            | GatewayError::Timeout { .. }
            | GatewayError::Internal { .. } => {
                rmcp::ErrorData::internal_error(err.to_string(), data)
            }
        }
    }
}
