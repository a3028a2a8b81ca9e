//! MCP server integration module.
//!
//! Exposes the gateway's tables as resources and its SQL and schema tools
//! through the rmcp framework.

pub mod service;

pub use service::GatewayService;
