//! MCP server integration.

pub mod service;

pub use service::DbService;
