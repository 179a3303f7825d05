//! MCP service implementation using rmcp.
//!
//! `DbService` exposes the read-only database tools. Each tool turns its
//! input into a `DbRequest` and hands it to the shared `QueryExecutor`.

use crate::db::QueryExecutor;
use crate::models::{DbRequest, QueryResult};
use crate::tools::{
    DescribeTableInput, GetTableDataInput, ListProfilesOutput, ListTablesInput,
    QueryDatabaseInput,
};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct DbService {
    /// Shared executor; every call gets its own connection from it
    executor: Arc<QueryExecutor>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl DbService {
    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        Self {
            executor,
            tool_router: Self::tool_router(),
        }
    }

    async fn run(&self, request: DbRequest) -> Result<Json<QueryResult>, McpError> {
        self.executor
            .run(request)
            .await
            .map(Json)
            .map_err(McpError::from)
    }
}

#[tool_router]
impl DbService {
    #[tool(
        description = "List configured database profiles.\nReturns profile names to use as database_name, whether each is fully configured, and which one is the default."
    )]
    async fn list_profiles(&self) -> Json<ListProfilesOutput> {
        let registry = self.executor.registry();
        let profiles = registry.summaries();
        Json(ListProfilesOutput {
            count: profiles.len(),
            profiles,
            default_profile: registry.default_profile().to_string(),
            ssh_tunnel: self.executor.factory().tunnel_mode().is_enabled(),
        })
    }

    #[tool(
        description = "Execute a read-only SELECT query.\nOnly a single statement starting with SELECT is accepted.\nLIMIT <limit> (default 100, max 1000) is appended unless the query already contains the word LIMIT."
    )]
    async fn query_database(
        &self,
        Parameters(input): Parameters<QueryDatabaseInput>,
    ) -> Result<Json<QueryResult>, McpError> {
        self.run(input.into()).await
    }

    #[tool(description = "List all tables in the database (SHOW TABLES).")]
    async fn list_tables(
        &self,
        Parameters(input): Parameters<ListTablesInput>,
    ) -> Result<Json<QueryResult>, McpError> {
        self.run(input.into()).await
    }

    #[tool(
        description = "Describe a table: column definitions in rows, index definitions in indexes."
    )]
    async fn describe_table(
        &self,
        Parameters(input): Parameters<DescribeTableInput>,
    ) -> Result<Json<QueryResult>, McpError> {
        self.run(input.into()).await
    }

    #[tool(
        description = "Fetch rows from a table with an optional filter.\nReturns up to limit rows (default 10, max 1000) and total_row_count for the filter.\nThe where fragment is inserted into the SQL as given: the call is read-only but not injection-proof for filter fragments."
    )]
    async fn get_table_data(
        &self,
        Parameters(input): Parameters<GetTableDataInput>,
    ) -> Result<Json<QueryResult>, McpError> {
        self.run(input.into()).await
    }
}

#[tool_handler]
impl ServerHandler for DbService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "qa-db-mcp-server".to_owned(),
                title: Some("QA DB MCP Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Read-only access to the QA MySQL databases.\n\
                \n\
                ## Workflow\n\
                1. Call `list_profiles` to see which databases are configured\n\
                2. Pass the profile name as `database_name` (omit it for the default profile)\n\
                3. Use `list_tables` and `describe_table` before writing queries\n\
                \n\
                ## Rules\n\
                - `query_database` accepts SELECT statements only\n\
                - Row limits default to 100 (queries) and 10 (`get_table_data`), capped at 1000\n\
                - Table names may contain letters, digits, underscores and hyphens only\n\
                \n\
                Every call opens its own connection (through the SSH bastion when enabled) and closes it afterwards."
                    .to_string(),
            ),
        }
    }
}
