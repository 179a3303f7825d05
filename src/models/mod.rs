//! Data models for the QA DB MCP Server.
//!
//! This module re-exports all model types used throughout the application.

pub mod profile;
pub mod query;

// Re-export commonly used types
pub use profile::{
    DEFAULT_MYSQL_PORT, DEFAULT_SSH_PORT, DatabaseProfile, ProfileSummary, TunnelMode,
    TunnelProfile,
};
pub use query::{
    DEFAULT_QUERY_LIMIT, DEFAULT_TABLE_DATA_LIMIT, DbRequest, JsonRow, MAX_ROW_LIMIT, QueryResult,
};
