//! Input for the `query_database` tool.

use crate::models::DbRequest;
use schemars::JsonSchema;
use serde::Deserialize;

/// Input for the query_database tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryDatabaseInput {
    /// SQL SELECT statement. Anything that does not start with SELECT is rejected.
    pub query: String,
    /// Database profile from list_profiles. Omit for the default profile.
    #[serde(default, alias = "profile")]
    pub database_name: Option<String>,
    /// Maximum rows to return when the query has no LIMIT. Default: 100, max: 1000
    #[serde(default)]
    pub limit: Option<i64>,
}

impl From<QueryDatabaseInput> for DbRequest {
    fn from(input: QueryDatabaseInput) -> Self {
        DbRequest::Query {
            profile: input.database_name,
            query: input.query,
            limit: input.limit,
        }
    }
}
