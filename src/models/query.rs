//! Query-related data models.
//!
//! This module defines the request variants accepted by the executor and the
//! shaped result it returns.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default row limit for free-form queries.
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

/// Default row limit for table data fetches.
pub const DEFAULT_TABLE_DATA_LIMIT: u32 = 10;

/// Maximum allowed row limit.
pub const MAX_ROW_LIMIT: u32 = 1000;

/// One result row, column name to value, in column order.
pub type JsonRow = serde_json::Map<String, JsonValue>;

/// A single database operation, already split per kind.
///
/// Deserializes from the logical request shape
/// `{"operation": "getTableData", "tableName": "users", "where": "id > 3"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum DbRequest {
    #[serde(rename_all = "camelCase")]
    Query {
        #[serde(default)]
        profile: Option<String>,
        query: String,
        #[serde(default)]
        limit: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    ListTables {
        #[serde(default)]
        profile: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DescribeTable {
        #[serde(default)]
        profile: Option<String>,
        table_name: String,
    },
    #[serde(rename_all = "camelCase")]
    GetTableData {
        #[serde(default)]
        profile: Option<String>,
        table_name: String,
        #[serde(default)]
        limit: Option<i64>,
        #[serde(default, rename = "where")]
        where_clause: Option<String>,
    },
}

impl DbRequest {
    /// Requested profile; `None` selects the default profile.
    pub fn profile(&self) -> Option<&str> {
        match self {
            Self::Query { profile, .. }
            | Self::ListTables { profile }
            | Self::DescribeTable { profile, .. }
            | Self::GetTableData { profile, .. } => profile.as_deref(),
        }
    }

    /// Operation name used in logs.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Query { .. } => "query",
            Self::ListTables { .. } => "listTables",
            Self::DescribeTable { .. } => "describeTable",
            Self::GetTableData { .. } => "getTableData",
        }
    }
}

/// Shaped result of one operation.
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
pub struct QueryResult {
    /// Profile the operation ran against
    pub profile: String,
    /// Final text of the primary statement actually executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Table name for table-scoped operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Number of rows returned
    pub row_count: usize,
    /// Result rows as column-name to value maps
    pub rows: Vec<JsonRow>,
    /// Rows matching the filter, ignoring the limit (get_table_data only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_row_count: Option<u64>,
    /// Effective row limit (get_table_data only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Filter applied (get_table_data only)
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
    /// Index definitions (describe_table only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexes: Option<Vec<JsonRow>>,
}

impl QueryResult {
    /// Result carrying rows for the given profile, with the row count filled in.
    pub fn with_rows(profile: impl Into<String>, rows: Vec<JsonRow>) -> Self {
        Self {
            profile: profile.into(),
            row_count: rows.len(),
            rows,
            ..Self::default()
        }
    }
}
