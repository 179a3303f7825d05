//! QA DB MCP Server Library
//!
//! MCP (Model Context Protocol) tools giving AI assistants read-only access to
//! named MySQL databases, optionally through a per-request SSH tunnel.

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use db::{ConnectionFactory, ProfileRegistry, QueryExecutor};
pub use error::DbError;
pub use mcp::DbService;
