//! Read-only query policy.
//!
//! Every request is turned into a [`QueryPlan`] here before any connection is
//! made, so a rejected request never touches a tunnel or the database.
//!
//! The policy is textual, not a SQL parser:
//! - a free-form query must start with the keyword `SELECT` and be a single
//!   statement (one trailing `;` is dropped, any other `;` is refused);
//! - `LIMIT n` is appended unless the text already contains `limit` anywhere
//!   (case-insensitive), which also matches column names such as `credit_limit`;
//! - table names must match `^[A-Za-z0-9_-]+$` and are backtick-quoted;
//! - the `get_table_data` WHERE fragment is inserted as given apart from the
//!   `;` check. It stays a single SELECT but is not injection-proof.

use crate::error::{DbError, DbResult};
use crate::models::{DEFAULT_QUERY_LIMIT, DEFAULT_TABLE_DATA_LIMIT, DbRequest, MAX_ROW_LIMIT};

const SELECT_ONLY_MESSAGE: &str =
    "Only SELECT queries are allowed. This is a READ-ONLY database connection.";

const SINGLE_STATEMENT_MESSAGE: &str =
    "Multiple statements are not allowed. Submit a single SELECT statement without ';'.";

const INVALID_TABLE_MESSAGE: &str =
    "Invalid table name. Only alphanumeric characters, underscores, and hyphens are allowed.";

/// Effective row limit: missing or non-positive means `default`, anything
/// above [`MAX_ROW_LIMIT`] is capped.
pub fn effective_limit(requested: Option<i64>, default: u32) -> u32 {
    match requested {
        Some(n) if n > 0 => n.min(i64::from(MAX_ROW_LIMIT)) as u32,
        _ => default,
    }
}

/// The leading keyword of a statement: the run of ASCII letters after
/// leading whitespace.
fn first_keyword(sql: &str) -> &str {
    let trimmed = sql.trim_start();
    let end = trimmed
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    &trimmed[..end]
}

/// Refuse text that could carry a second statement.
fn reject_statement_separator(sql: &str) -> DbResult<()> {
    if sql.contains(';') {
        Err(DbError::validation(SINGLE_STATEMENT_MESSAGE))
    } else {
        Ok(())
    }
}

/// Check a free-form query and return the SQL to execute.
///
/// The text is trimmed and trailing `;` are dropped; ` LIMIT n` is appended
/// when it does not already mention `limit`.
pub fn validate_query(query: &str, limit: Option<i64>) -> DbResult<String> {
    let sql = query
        .trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if !first_keyword(sql).eq_ignore_ascii_case("select") {
        return Err(DbError::validation(SELECT_ONLY_MESSAGE));
    }
    reject_statement_separator(sql)?;

    if sql.to_lowercase().contains("limit") {
        return Ok(sql.to_string());
    }

    let limit = effective_limit(limit, DEFAULT_QUERY_LIMIT);
    Ok(format!("{} LIMIT {}", sql, limit))
}

/// Check a table name against `^[A-Za-z0-9_-]+$`.
pub fn validate_identifier(name: &str) -> DbResult<&str> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(name)
    } else {
        Err(DbError::validation(INVALID_TABLE_MESSAGE))
    }
}

/// Wrap a validated identifier in backticks.
fn quote(table: &str) -> String {
    format!("`{}`", table)
}

/// Validated statements for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    Select {
        sql: String,
    },
    ListTables,
    DescribeTable {
        table: String,
    },
    TableData {
        table: String,
        where_clause: Option<String>,
        limit: u32,
    },
}

impl QueryPlan {
    /// Validate `request` without touching any resource.
    pub fn from_request(request: &DbRequest) -> DbResult<Self> {
        match request {
            DbRequest::Query { query, limit, .. } => Ok(Self::Select {
                sql: validate_query(query, *limit)?,
            }),
            DbRequest::ListTables { .. } => Ok(Self::ListTables),
            DbRequest::DescribeTable { table_name, .. } => Ok(Self::DescribeTable {
                table: validate_identifier(table_name)?.to_string(),
            }),
            DbRequest::GetTableData {
                table_name,
                limit,
                where_clause,
                ..
            } => {
                let table = validate_identifier(table_name)?.to_string();
                let where_clause = where_clause
                    .as_deref()
                    .map(str::trim)
                    .filter(|w| !w.is_empty());
                if let Some(filter) = where_clause {
                    reject_statement_separator(filter)?;
                }
                Ok(Self::TableData {
                    table,
                    where_clause: where_clause.map(str::to_string),
                    limit: effective_limit(*limit, DEFAULT_TABLE_DATA_LIMIT),
                })
            }
        }
    }

    /// Statement whose rows form the primary result.
    pub fn primary_sql(&self) -> String {
        match self {
            Self::Select { sql } => sql.clone(),
            Self::ListTables => "SHOW TABLES".to_string(),
            Self::DescribeTable { table } => format!("DESCRIBE {}", quote(table)),
            Self::TableData {
                table,
                where_clause,
                limit,
            } => format!(
                "SELECT * FROM {}{} LIMIT {}",
                quote(table),
                where_suffix(where_clause.as_deref()),
                limit
            ),
        }
    }

    /// Follow-up statement, if the operation needs one.
    ///
    /// `describeTable` reads the index list; `getTableData` counts every row
    /// matching the filter.
    pub fn secondary_sql(&self) -> Option<String> {
        match self {
            Self::DescribeTable { table } => Some(format!("SHOW INDEXES FROM {}", quote(table))),
            Self::TableData {
                table,
                where_clause,
                ..
            } => Some(format!(
                "SELECT COUNT(*) as total FROM {}{}",
                quote(table),
                where_suffix(where_clause.as_deref())
            )),
            _ => None,
        }
    }
}

fn where_suffix(where_clause: Option<&str>) -> String {
    match where_clause {
        Some(w) => format!(" WHERE {}", w),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_limit() {
        assert_eq!(effective_limit(None, 100), 100);
        assert_eq!(effective_limit(Some(0), 100), 100);
        assert_eq!(effective_limit(Some(-5), 10), 10);
        assert_eq!(effective_limit(Some(1), 100), 1);
        assert_eq!(effective_limit(Some(1000), 100), 1000);
        assert_eq!(effective_limit(Some(5000), 100), 1000);
        assert_eq!(effective_limit(Some(i64::MAX), 10), 1000);
    }

    #[test]
    fn test_first_keyword() {
        assert_eq!(first_keyword("  select * from t"), "select");
        assert_eq!(first_keyword("SELECT*FROM t"), "SELECT");
        assert_eq!(first_keyword("\n\tShow tables"), "Show");
        assert_eq!(first_keyword("(select 1)"), "");
        assert_eq!(first_keyword(""), "");
    }

    #[test]
    fn test_select_gets_default_limit() {
        assert_eq!(
            validate_query("  SELECT * FROM users  ", None).unwrap(),
            "SELECT * FROM users LIMIT 100"
        );
    }

    #[test]
    fn test_existing_limit_is_left_alone() {
        let sql = "select * from users LiMiT 5";
        assert_eq!(validate_query(sql, Some(50)).unwrap(), sql);
    }

    #[test]
    fn test_limit_substring_in_column_suppresses_append() {
        let sql = "SELECT credit_limit FROM accounts";
        assert_eq!(validate_query(sql, Some(50)).unwrap(), sql);
    }

    #[test]
    fn test_non_select_rejected() {
        for sql in [
            "UPDATE users SET a = 1",
            "DELETE FROM users",
            "show tables",
            "selectx * from t",
            "WITH x AS (SELECT 1) SELECT * FROM x",
            "",
            "   ",
        ] {
            let err = validate_query(sql, None).unwrap_err();
            assert!(matches!(err, DbError::Validation { .. }), "{sql}");
            assert!(err.to_string().contains("Only SELECT queries are allowed"));
        }
    }

    #[test]
    fn test_stacked_statements_rejected() {
        for sql in [
            "SELECT 1 LIMIT 1; DELETE FROM users",
            "SELECT 1; DELETE FROM users WHERE 1",
            "select * from t;drop table t;",
        ] {
            let err = validate_query(sql, Some(5)).unwrap_err();
            assert!(matches!(err, DbError::Validation { .. }), "{sql}");
            assert!(err.to_string().contains("Multiple statements"));
        }
    }

    #[test]
    fn test_trailing_semicolon_dropped() {
        assert_eq!(
            validate_query("SELECT * FROM users; ", None).unwrap(),
            "SELECT * FROM users LIMIT 100"
        );
        assert_eq!(
            validate_query("SELECT * FROM users LIMIT 3;;", None).unwrap(),
            "SELECT * FROM users LIMIT 3"
        );
    }

    #[test]
    fn test_where_fragment_with_separator_rejected() {
        let request = DbRequest::GetTableData {
            profile: None,
            table_name: "orders".to_string(),
            limit: None,
            where_clause: Some("1=1; DELETE FROM users WHERE 1".to_string()),
        };
        let err = QueryPlan::from_request(&request).unwrap_err();
        assert!(matches!(err, DbError::Validation { .. }));
    }

    #[test]
    fn test_select_without_space_accepted() {
        assert_eq!(
            validate_query("select*from t", Some(3)).unwrap(),
            "select*from t LIMIT 3"
        );
    }

    #[test]
    fn test_identifier_rules() {
        assert!(validate_identifier("orders").is_ok());
        assert!(validate_identifier("order_items-2024").is_ok());
        for bad in ["", "users;", "a b", "users`", "db.users", "naïve"] {
            assert!(validate_identifier(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_table_data_plan() {
        let request = DbRequest::GetTableData {
            profile: None,
            table_name: "orders".to_string(),
            limit: None,
            where_clause: Some(" status = 'open' ".to_string()),
        };
        let plan = QueryPlan::from_request(&request).unwrap();
        assert_eq!(
            plan.primary_sql(),
            "SELECT * FROM `orders` WHERE status = 'open' LIMIT 10"
        );
        assert_eq!(
            plan.secondary_sql().unwrap(),
            "SELECT COUNT(*) as total FROM `orders` WHERE status = 'open'"
        );
    }

    #[test]
    fn test_table_data_blank_where_ignored() {
        let request = DbRequest::GetTableData {
            profile: None,
            table_name: "orders".to_string(),
            limit: Some(2000),
            where_clause: Some("   ".to_string()),
        };
        let plan = QueryPlan::from_request(&request).unwrap();
        assert_eq!(plan.primary_sql(), "SELECT * FROM `orders` LIMIT 1000");
        assert_eq!(
            plan.secondary_sql().unwrap(),
            "SELECT COUNT(*) as total FROM `orders`"
        );
    }

    #[test]
    fn test_describe_plan() {
        let request = DbRequest::DescribeTable {
            profile: Some("evp_lt".to_string()),
            table_name: "users".to_string(),
        };
        let plan = QueryPlan::from_request(&request).unwrap();
        assert_eq!(plan.primary_sql(), "DESCRIBE `users`");
        assert_eq!(plan.secondary_sql().unwrap(), "SHOW INDEXES FROM `users`");
    }

    #[test]
    fn test_list_tables_plan() {
        let plan = QueryPlan::from_request(&DbRequest::ListTables { profile: None }).unwrap();
        assert_eq!(plan.primary_sql(), "SHOW TABLES");
        assert!(plan.secondary_sql().is_none());
    }
}
