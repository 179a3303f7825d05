//! Inputs and outputs for the table and profile tools.

use crate::models::{DbRequest, ProfileSummary};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Input for the list_tables tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListTablesInput {
    /// Database profile from list_profiles. Omit for the default profile.
    #[serde(default, alias = "profile")]
    pub database_name: Option<String>,
}

impl From<ListTablesInput> for DbRequest {
    fn from(input: ListTablesInput) -> Self {
        DbRequest::ListTables {
            profile: input.database_name,
        }
    }
}

/// Input for the describe_table tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DescribeTableInput {
    /// Table name. Letters, digits, underscores and hyphens only.
    pub table_name: String,
    /// Database profile from list_profiles. Omit for the default profile.
    #[serde(default, alias = "profile")]
    pub database_name: Option<String>,
}

impl From<DescribeTableInput> for DbRequest {
    fn from(input: DescribeTableInput) -> Self {
        DbRequest::DescribeTable {
            profile: input.database_name,
            table_name: input.table_name,
        }
    }
}

/// Input for the get_table_data tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetTableDataInput {
    /// Table name. Letters, digits, underscores and hyphens only.
    pub table_name: String,
    /// Database profile from list_profiles. Omit for the default profile.
    #[serde(default, alias = "profile")]
    pub database_name: Option<String>,
    /// Maximum rows to return. Default: 10, max: 1000
    #[serde(default)]
    pub limit: Option<i64>,
    /// Filter without the WHERE keyword, e.g. "status = 'open'". Inserted as given.
    #[serde(default, rename = "where")]
    pub where_clause: Option<String>,
}

impl From<GetTableDataInput> for DbRequest {
    fn from(input: GetTableDataInput) -> Self {
        DbRequest::GetTableData {
            profile: input.database_name,
            table_name: input.table_name,
            limit: input.limit,
            where_clause: input.where_clause,
        }
    }
}

/// Output for the list_profiles tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListProfilesOutput {
    /// Configured profiles, in configuration order
    pub profiles: Vec<ProfileSummary>,
    /// Profile used when database_name is omitted
    pub default_profile: String,
    /// Whether connections go through the SSH bastion
    pub ssh_tunnel: bool,
    /// Number of profiles
    pub count: usize,
}
