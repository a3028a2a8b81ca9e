//! Configuration handling for the MySQL MCP gateway.
//!
//! Two layers:
//! - [`Config`]: process options from CLI arguments and `MCP_*` environment variables (clap).
//! - [`ConnectionSettings`]: database and SSH tunnel parameters from `MYSQL_*` variables,
//!   resolved once at startup and shared immutably afterwards.

use crate::error::{GatewayError, GatewayResult};
use crate::logging::{MASK, Redactor};
use clap::{Parser, ValueEnum};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MCP_ENDPOINT: &str = "/";
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TUNNEL_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TUNNEL_TEARDOWN_SECS: u64 = 5;
pub const DEFAULT_MAX_ROWS: u32 = 1000;
pub const MAX_ROWS_CAP: u32 = 10_000;
pub const DEFAULT_REFERENCE_DOC: &str = "MCP_USECASES.md";

pub const DEFAULT_MYSQL_PORT: u16 = 3306;
pub const DEFAULT_CHARSET: &str = "utf8mb4";
pub const DEFAULT_COLLATION: &str = "utf8mb4_unicode_ci";
pub const DEFAULT_SQL_MODE: &str = "TRADITIONAL";
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SSH_BINARY: &str = "ssh";
pub const DEFAULT_STRICT_HOST_KEY_CHECKING: &str = "accept-new";

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// Standard input/output (for CLI integration)
    #[default]
    Stdio,
    /// Streamable HTTP (for web clients)
    Http,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Process configuration for the gateway.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "mysql-mcp-gateway",
    about = "MCP server exposing a MySQL database, optionally through an SSH tunnel",
    long_about = "MCP server exposing a MySQL database, optionally through an SSH tunnel.\n\n\
        Database and tunnel settings are read from MYSQL_* environment variables \
        (a .env file in the working directory is loaded first).",
    version,
    author
)]
pub struct Config {
    /// Transport mode (stdio or http)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "stdio",
        env = "MCP_TRANSPORT"
    )]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_HTTP_HOST,
        env = "MCP_HTTP_HOST"
    )]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport)
    #[arg(
        long,
        default_value_t = DEFAULT_HTTP_PORT,
        env = "MCP_HTTP_PORT"
    )]
    pub http_port: u16,

    /// MCP endpoint path (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_MCP_ENDPOINT,
        env = "MCP_ENDPOINT"
    )]
    pub mcp_endpoint: String,

    /// Query timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "MCP_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "MCP_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Seconds to wait for the SSH tunnel to accept connections
    #[arg(
        long,
        default_value_t = DEFAULT_TUNNEL_TIMEOUT_SECS,
        env = "MCP_TUNNEL_TIMEOUT"
    )]
    pub tunnel_timeout: u64,

    /// Maximum rows returned by a read statement
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_ROWS,
        env = "MCP_MAX_ROWS"
    )]
    pub max_rows: u32,

    /// Reject statements that modify data
    #[arg(long, env = "MCP_READ_ONLY")]
    pub read_only: bool,

    /// Markdown document served by the get_reference_doc tool
    #[arg(
        long,
        default_value = DEFAULT_REFERENCE_DOC,
        env = "MCP_REFERENCE_DOC"
    )]
    pub reference_doc: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH", env = "MCP_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            transport: TransportMode::Stdio,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            mcp_endpoint: DEFAULT_MCP_ENDPOINT.to_string(),
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            tunnel_timeout: DEFAULT_TUNNEL_TIMEOUT_SECS,
            max_rows: DEFAULT_MAX_ROWS,
            read_only: false,
            reference_doc: PathBuf::from(DEFAULT_REFERENCE_DOC),
            log_level: "info".to_string(),
            json_logs: false,
            log_file: None,
        }
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    /// Get the connection timeout as a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Get the tunnel readiness timeout as a Duration.
    pub fn tunnel_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.tunnel_timeout)
    }

    /// Build the runtime options for the gateway and executor.
    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            connect_timeout: self.connect_timeout_duration(),
            query_timeout: self.query_timeout_duration(),
            tunnel_timeout: self.tunnel_timeout_duration(),
            tunnel_teardown_timeout: Duration::from_secs(DEFAULT_TUNNEL_TEARDOWN_SECS),
            max_rows: self.max_rows.clamp(1, MAX_ROWS_CAP),
            read_only: self.read_only,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Timeouts and limits used by the gateway, tunnel and executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayOptions {
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    pub tunnel_timeout: Duration,
    pub tunnel_teardown_timeout: Duration,
    /// Row cap for read statements, already clamped to `1..=MAX_ROWS_CAP`
    pub max_rows: u32,
    pub read_only: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Config::default_config().gateway_options()
    }
}

/// SSH local-forwarding parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct SshSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: PathBuf,
    pub remote_host: String,
    pub remote_port: u16,
    /// Fixed local port; `None` picks a free one per tunnel
    pub local_port: Option<u16>,
    pub binary: String,
    pub strict_host_key_checking: String,
}

impl fmt::Debug for SshSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("key_path", &MASK)
            .field("remote_host", &self.remote_host)
            .field("remote_port", &self.remote_port)
            .field("local_port", &self.local_port)
            .field("binary", &self.binary)
            .field("strict_host_key_checking", &self.strict_host_key_checking)
            .finish()
    }
}

/// Database connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub charset: String,
    pub collation: String,
    pub sql_mode: String,
    /// Present only when `MYSQL_SSH_ENABLE` is true
    pub ssh: Option<SshSettings>,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &MASK)
            .field("database", &self.database)
            .field("charset", &self.charset)
            .field("collation", &self.collation)
            .field("sql_mode", &self.sql_mode)
            .field("ssh", &self.ssh)
            .finish()
    }
}

impl ConnectionSettings {
    /// Resolve settings from the process environment.
    pub fn resolve() -> GatewayResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve settings through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> GatewayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Lookup(&lookup);

        let settings = Self {
            host: vars.required("MYSQL_HOST")?,
            port: vars.port("MYSQL_PORT")?.unwrap_or(DEFAULT_MYSQL_PORT),
            user: vars.required("MYSQL_USER")?,
            password: vars.required("MYSQL_PASSWORD")?,
            database: vars.required("MYSQL_DATABASE")?,
            charset: vars.or_default("MYSQL_CHARSET", DEFAULT_CHARSET),
            collation: vars.or_default("MYSQL_COLLATION", DEFAULT_COLLATION),
            sql_mode: vars.or_default("MYSQL_SQL_MODE", DEFAULT_SQL_MODE),
            ssh: if vars.flag("MYSQL_SSH_ENABLE")? {
                Some(SshSettings::from_vars(&vars)?)
            } else {
                None
            },
        };

        Ok(settings)
    }

    /// True if connections go through an SSH tunnel.
    pub fn ssh_enabled(&self) -> bool {
        self.ssh.is_some()
    }

    /// Build the redactor for this configuration's secret values.
    pub fn redactor(&self) -> Redactor {
        let mut secrets = vec![self.password.clone()];
        if let Some(ssh) = &self.ssh {
            secrets.push(ssh.key_path.to_string_lossy().into_owned());
        }
        Redactor::new(secrets)
    }
}

impl SshSettings {
    fn from_vars<F>(vars: &Lookup<'_, F>) -> GatewayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = vars.required("MYSQL_SSH_HOST")?;
        let user = vars.required("MYSQL_SSH_USER")?;
        let key_path = PathBuf::from(vars.required("MYSQL_SSH_KEY_PATH")?);
        if !key_path.is_file() {
            // The path itself is a secret; never echo it.
            return Err(GatewayError::configuration(
                "MYSQL_SSH_KEY_PATH",
                "does not name an existing file",
            ));
        }
        let remote_host = vars.required("MYSQL_SSH_REMOTE_HOST")?;
        let remote_port = vars
            .port("MYSQL_SSH_REMOTE_PORT")?
            .ok_or_else(|| GatewayError::missing_variable("MYSQL_SSH_REMOTE_PORT"))?;

        Ok(Self {
            host,
            port: vars.port("MYSQL_SSH_PORT")?.unwrap_or(DEFAULT_SSH_PORT),
            user,
            key_path,
            remote_host,
            remote_port,
            local_port: vars.port("MYSQL_LOCAL_PORT")?,
            binary: vars.or_default("MYSQL_SSH_BINARY", DEFAULT_SSH_BINARY),
            strict_host_key_checking: vars.or_default(
                "MYSQL_SSH_STRICT_HOST_KEY_CHECKING",
                DEFAULT_STRICT_HOST_KEY_CHECKING,
            ),
        })
    }
}

/// Typed access over a raw variable lookup.
struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &str) -> GatewayResult<String> {
        self.get(name)
            .ok_or_else(|| GatewayError::missing_variable(name))
    }

    fn or_default(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn port(&self, name: &str) -> GatewayResult<Option<u16>> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => match raw.trim().parse::<u16>() {
                Ok(0) | Err(_) => Err(GatewayError::configuration(
                    name,
                    format!("must be a port number between 1 and 65535, got '{}'", raw),
                )),
                Ok(port) => Ok(Some(port)),
            },
        }
    }

    fn flag(&self, name: &str) -> GatewayResult<bool> {
        match self.get(name) {
            None => Ok(false),
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                GatewayError::configuration(
                    name,
                    format!("must be one of true/false/1/0/yes/no, got '{}'", raw),
                )
            }),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
