//! Database access layer.
//!
//! - `gateway`: the cached connection and its tunnel
//! - `executor`: statement execution on one connection
//! - `catalog`: table listing, previews and introspection
//! - `types`: MySQL value decoding

pub mod catalog;
pub mod executor;
pub mod gateway;
pub mod types;

pub use catalog::SchemaCatalog;
pub use gateway::ConnectionGateway;
