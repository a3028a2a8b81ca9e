//! MySQL MCP gateway library.
//!
//! Exposes the tables of one MySQL database to MCP clients as resources, and
//! SQL execution and schema introspection as tools. The database may be
//! reached directly or through an `ssh -L` tunnel that is started lazily and
//! re-established when it dies.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;
pub mod tunnel;

pub use config::{Config, ConnectionSettings, GatewayOptions};
pub use db::{ConnectionGateway, SchemaCatalog};
pub use error::{GatewayError, GatewayResult};
pub use mcp::GatewayService;
