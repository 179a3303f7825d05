//! Error types for the QA DB MCP Server.
//!
//! Every failure a tool call can report is a `DbError`. The variants follow the
//! stages of a request: configuration, validation, tunnel setup, driver connect
//! and query execution. Cleanup failures never become errors; they are logged
//! and dropped because the outcome of the request is already decided.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// A profile or the SSH tunnel settings are incomplete or unknown.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The request was rejected before any resource was acquired.
    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("SSH tunnel error for database '{profile}' via {ssh_host}: {message}")]
    Tunnel {
        profile: String,
        ssh_host: String,
        message: String,
    },

    #[error("Connection to database '{profile}' failed: {message}")]
    Connection {
        profile: String,
        message: String,
        suggestion: String,
    },

    #[error("Database query error: {message}")]
    Query {
        message: String,
        /// e.g., "42S02" for a missing table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a tunnel error naming the profile and the SSH host.
    pub fn tunnel(
        profile: impl Into<String>,
        ssh_host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Tunnel {
            profile: profile.into(),
            ssh_host: ssh_host.into(),
            message: message.into(),
        }
    }

    /// Create a driver connect error with a helpful suggestion.
    pub fn connection(
        profile: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Connection {
            profile: profile.into(),
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a query error with optional SQL state.
    pub fn query(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Query {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Map a driver error raised while opening a session.
    pub fn from_connect(profile: &str, err: sqlx::Error) -> Self {
        let suggestion = match &err {
            sqlx::Error::Database(_) => "Check the profile's user, password and database name",
            sqlx::Error::Io(_) => "Check network connectivity and database server status",
            sqlx::Error::Tls(_) => "Verify TLS configuration and certificates",
            _ => "Check the profile's connection settings",
        };
        Self::connection(profile, err.to_string(), suggestion)
    }

    /// Stable machine-readable category, reported to callers as `kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Validation { .. } => "validation",
            Self::Tunnel { .. } => "tunnel",
            Self::Connection { .. } => "connection",
            Self::Query { .. } => "query",
            Self::Internal { .. } => "internal",
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Query { suggestion, .. } => Some(suggestion),
            Self::Config { .. } => Some("Set the required environment variables and restart the server"),
            Self::Tunnel { .. } => Some("Check SSH_HOST, SSH_USER and SSH_KEY_PATH and that the bastion allows port forwarding"),
            _ => None,
        }
    }
}

/// Convert execution-stage sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::query(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::Io(io_err) => DbError::query(
                format!("I/O error: {}", io_err),
                None,
                "The connection was lost while the query was running",
            ),
            sqlx::Error::Protocol(msg) => DbError::query(
                format!("Protocol error: {}", msg),
                None,
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::query(
                format!("Unknown database error: {}", err),
                None,
                "Retry the request",
            ),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Build the `data` object attached to MCP errors.
fn error_data(err: &DbError) -> Option<serde_json::Value> {
    let mut data = serde_json::json!({ "kind": err.kind() });
    if let Some(suggestion) = err.suggestion() {
        data["suggestion"] = serde_json::Value::String(suggestion.to_string());
    }
    if let DbError::Query {
        sql_state: Some(code),
        ..
    } = err
    {
        data["sql_state"] = serde_json::Value::String(code.clone());
    }
    Some(data)
}

/// Convert DbError to MCP ErrorData.
///
/// Caller mistakes (validation, SQL errors) become `invalid_params`; everything
/// that depends on server-side setup becomes `internal_error`.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        let data = error_data(&err);
        match &err {
            DbError::Validation { .. } | DbError::Query { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), data)
            }
            DbError::Config { .. }
            | DbError::Tunnel { .. }
            | DbError::Connection { .. }
            | DbError::Internal { .. } => rmcp::ErrorData::internal_error(err.to_string(), data),
        }
    }
}
