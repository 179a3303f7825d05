//! Connection profile models.
//!
//! Profiles are built once at startup and never mutated afterwards.

use schemars::JsonSchema;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Default MySQL port when `{PREFIX}_PORT` is not set.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Default SSH port when `SSH_PORT` is not set.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Credentials for one logical database.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseProfile {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    /// Sensitive - never logged.
    pub password: String,
}

impl DatabaseProfile {
    /// Names of the required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.host.trim().is_empty() {
            missing.push("HOST");
        }
        if self.user.trim().is_empty() {
            missing.push("USER");
        }
        if self.password.is_empty() {
            missing.push("PASSWORD");
        }
        if self.database.trim().is_empty() {
            missing.push("DATABASE");
        }
        missing
    }

    /// A profile is usable only when host, user, password and database are set.
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

impl fmt::Debug for DatabaseProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseProfile")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// SSH bastion used for every profile when tunnelling is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelProfile {
    pub ssh_host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub private_key_path: PathBuf,
}

/// How database sessions reach their servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelMode {
    /// Connect straight to each profile's host:port.
    Direct,
    /// Forward every connection through this SSH bastion.
    Ssh(TunnelProfile),
    /// Tunnelling was requested but these settings are blank.
    Misconfigured { missing: Vec<String> },
}

impl TunnelMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Direct)
    }
}

/// Profile information returned by list_profiles (no secrets exposed).
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ProfileSummary {
    /// Profile name. Use this value as `database_name` in the other tools.
    pub name: String,
    /// Database (schema) name on the server, empty when not configured
    pub database: String,
    /// False when host, user, password or database is missing
    pub configured: bool,
    /// True for the profile used when `database_name` is omitted
    pub is_default: bool,
}
