//! Request execution.
//!
//! `QueryExecutor::run` is the only entry point for database work:
//! validate, acquire a connection, run the statements, shape the result and
//! release the connection on every path.

use crate::db::connection::{
    ConnectionFactory, Connector, DbSession, LiveConnection, MySqlConnector,
};
use crate::db::registry::ProfileRegistry;
use crate::db::tunnel::{SshTunnelManager, Tunnel, TunnelOpener};
use crate::db::types::json_to_count;
use crate::error::DbResult;
use crate::models::{DbRequest, QueryResult};
use crate::tools::guard::QueryPlan;
use std::time::Instant;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

/// Executes validated requests over request-scoped connections.
pub struct QueryExecutor<C = MySqlConnector, T = SshTunnelManager> {
    factory: ConnectionFactory<C, T>,
}

impl<C: Connector, T: TunnelOpener> QueryExecutor<C, T> {
    pub fn new(factory: ConnectionFactory<C, T>) -> Self {
        Self { factory }
    }

    pub fn registry(&self) -> &ProfileRegistry {
        self.factory.registry()
    }

    pub fn factory(&self) -> &ConnectionFactory<C, T> {
        &self.factory
    }

    /// Run one request.
    ///
    /// Validation happens before anything is acquired. Once a connection
    /// exists it is released exactly once, whatever the outcome of the
    /// statements; release failures never replace the result.
    pub async fn run(&self, request: DbRequest) -> DbResult<QueryResult> {
        let span = info_span!(
            "db_request",
            request_id = %Uuid::new_v4(),
            operation = request.operation(),
            profile = request.profile().unwrap_or(self.registry().default_profile()),
        );

        async move {
            let start = Instant::now();
            let plan = QueryPlan::from_request(&request)?;

            if let QueryPlan::TableData {
                where_clause: Some(filter),
                ..
            } = &plan
            {
                info!(filter = %filter, "Applying caller-supplied WHERE fragment");
            }

            let mut conn = self.factory.connect(request.profile()).await?;
            let outcome = execute_plan(&mut conn, &plan).await;
            self.factory.release(conn).await;

            let result = outcome?;
            info!(
                row_count = result.row_count,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Request completed"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }
}

/// Run the plan's statements on an open connection and shape the result.
async fn execute_plan<S: DbSession, T: Tunnel>(
    conn: &mut LiveConnection<S, T>,
    plan: &QueryPlan,
) -> DbResult<QueryResult> {
    let profile = conn.profile().to_string();
    let sql = plan.primary_sql();
    debug!(sql = %sql, tunnelled = conn.is_tunnelled(), "Executing statement");
    let rows = conn.session_mut().fetch_rows(&sql).await?;
    let mut result = QueryResult::with_rows(profile, rows);
    result.query = Some(sql);

    match plan {
        QueryPlan::Select { .. } | QueryPlan::ListTables => {}
        QueryPlan::DescribeTable { table } => {
            result.table = Some(table.clone());
            if let Some(index_sql) = plan.secondary_sql() {
                result.indexes = Some(conn.session_mut().fetch_rows(&index_sql).await?);
            }
        }
        QueryPlan::TableData {
            table,
            where_clause,
            limit,
        } => {
            result.table = Some(table.clone());
            result.limit = Some(*limit);
            result.where_clause = where_clause.clone();
            if let Some(count_sql) = plan.secondary_sql() {
                let counted = conn.session_mut().fetch_rows(&count_sql).await?;
                result.total_row_count = counted
                    .first()
                    .and_then(|row| row.get("total"))
                    .and_then(json_to_count);
            }
        }
    }

    Ok(result)
}
