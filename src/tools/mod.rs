//! MCP tool inputs and the read-only query policy.
//!
//! - `guard`: query and identifier validation, statement planning
//! - `query`: `query_database` input
//! - `schema`: `list_tables`, `describe_table`, `get_table_data` and `list_profiles` types

pub mod guard;
pub mod query;
pub mod schema;

pub use guard::{QueryPlan, effective_limit, validate_identifier, validate_query};
pub use query::QueryDatabaseInput;
pub use schema::{DescribeTableInput, GetTableDataInput, ListProfilesOutput, ListTablesInput};
