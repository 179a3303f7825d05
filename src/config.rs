//! Configuration handling for the QA DB MCP Server.
//!
//! This module provides configuration management via CLI arguments and environment variables.
//! The `Config` value is parsed once in `main`; nothing else reads the process environment
//! except `ProfileRegistry::from_env`, which runs at startup.

use crate::models::{DEFAULT_SSH_PORT, TunnelMode, TunnelProfile};
use clap::{ArgAction, Parser, ValueEnum};
use std::convert::Infallible;
use std::path::PathBuf;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MCP_ENDPOINT: &str = "/";
pub const DEFAULT_PROFILE: &str = "gateway";

/// Profiles known out of the box. The gateway database reads the `MYSQL_*` variables.
pub fn default_profile_specs() -> Vec<String> {
    vec![
        "gateway=MYSQL".to_string(),
        "evp_lt".to_string(),
        "gateway_remote".to_string(),
    ]
}

/// Read the tunnel gate. Never fails, so a stray value cannot stop startup.
fn parse_tunnel_flag(value: &str) -> Result<bool, Infallible> {
    Ok(value.trim().eq_ignore_ascii_case("true"))
}

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// Standard input/output (for CLI integration)
    #[default]
    Stdio,
    /// HTTP with Server-Sent Events (for web clients)
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// A profile name and the environment prefix its credentials are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSpec {
    pub name: String,
    /// `{env_prefix}_HOST`, `{env_prefix}_PORT`, ...
    pub env_prefix: String,
}

impl ProfileSpec {
    /// Parse a profile spec from a CLI argument.
    ///
    /// # Format
    ///
    /// - `name` - credentials read from `NAME_HOST`, `NAME_PORT`, ...
    /// - `name=PREFIX` - credentials read from `PREFIX_HOST`, `PREFIX_PORT`, ...
    ///
    /// ```text
    /// evp_lt            # EVP_LT_HOST, EVP_LT_USER, ...
    /// gateway=MYSQL     # MYSQL_HOST, MYSQL_USER, ...
    /// ```
    pub fn parse(s: &str) -> Result<Self, String> {
        let (name, prefix) = match s.split_once('=') {
            Some((name, prefix)) => (name.trim(), Some(prefix.trim())),
            None => (s.trim(), None),
        };

        if name.is_empty() {
            return Err(format!("Invalid profile spec '{s}': profile name is empty"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!(
                "Invalid profile name '{name}': only letters, digits, '_' and '-' are allowed"
            ));
        }

        let env_prefix = match prefix {
            Some("") => return Err(format!("Invalid profile spec '{s}': prefix is empty")),
            Some(p) => p.to_string(),
            None => name.to_ascii_uppercase().replace('-', "_"),
        };

        Ok(Self {
            name: name.to_string(),
            env_prefix,
        })
    }

    pub fn host_var(&self) -> String {
        format!("{}_HOST", self.env_prefix)
    }

    pub fn port_var(&self) -> String {
        format!("{}_PORT", self.env_prefix)
    }

    pub fn database_var(&self) -> String {
        format!("{}_DATABASE", self.env_prefix)
    }

    pub fn user_var(&self) -> String {
        format!("{}_USER", self.env_prefix)
    }

    pub fn password_var(&self) -> String {
        format!("{}_PASSWORD", self.env_prefix)
    }
}

/// Configuration for the QA DB MCP Server.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "qa-db-mcp-server",
    about = "MCP server for read-only MySQL access, optionally through an SSH tunnel",
    version,
    author
)]
pub struct Config {
    /// Database profiles.
    /// Format: "name" or "name=ENV_PREFIX".
    /// Credentials are read from {PREFIX}_HOST, {PREFIX}_PORT, {PREFIX}_DATABASE,
    /// {PREFIX}_USER and {PREFIX}_PASSWORD.
    #[arg(
        short = 'p',
        long = "profile",
        value_name = "SPEC",
        env = "DB_PROFILES",
        value_delimiter = ',',
        default_values_t = default_profile_specs()
    )]
    pub profiles: Vec<String>,

    /// Profile used when a tool call does not name one
    #[arg(long, default_value = DEFAULT_PROFILE, env = "DB_DEFAULT_PROFILE")]
    pub default_profile: String,

    /// Route every database connection through an SSH tunnel.
    /// Only the value `true` (any case) enables it; other values mean off.
    #[arg(
        long,
        env = "USE_SSH_TUNNEL",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value = "false",
        default_missing_value = "true",
        value_parser = parse_tunnel_flag
    )]
    pub use_ssh_tunnel: bool,

    /// SSH bastion host
    #[arg(long, env = "SSH_HOST")]
    pub ssh_host: Option<String>,

    /// SSH bastion port
    #[arg(long, default_value_t = DEFAULT_SSH_PORT, env = "SSH_PORT")]
    pub ssh_port: u16,

    /// SSH user name
    #[arg(long, env = "SSH_USER")]
    pub ssh_user: Option<String>,

    /// Path to the SSH private key (read per tunnel, never logged)
    #[arg(long, value_name = "PATH", env = "SSH_KEY_PATH")]
    pub ssh_key_path: Option<PathBuf>,

    /// Transport mode (stdio or http)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "stdio",
        env = "MCP_TRANSPORT"
    )]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_HTTP_HOST,
        env = "MCP_HTTP_HOST"
    )]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport)
    #[arg(
        long,
        default_value_t = DEFAULT_HTTP_PORT,
        env = "MCP_HTTP_PORT"
    )]
    pub http_port: u16,

    /// MCP endpoint path (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_MCP_ENDPOINT,
        env = "MCP_ENDPOINT"
    )]
    pub mcp_endpoint: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            profiles: default_profile_specs(),
            default_profile: DEFAULT_PROFILE.to_string(),
            use_ssh_tunnel: false,
            ssh_host: None,
            ssh_port: DEFAULT_SSH_PORT,
            ssh_user: None,
            ssh_key_path: None,
            transport: TransportMode::Stdio,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            mcp_endpoint: DEFAULT_MCP_ENDPOINT.to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Parse all profile specs, rejecting duplicates.
    pub fn parse_profiles(&self) -> Result<Vec<ProfileSpec>, String> {
        let mut specs: Vec<ProfileSpec> = Vec::with_capacity(self.profiles.len());
        for raw in &self.profiles {
            let spec = ProfileSpec::parse(raw)?;
            if specs.iter().any(|s| s.name == spec.name) {
                return Err(format!("Profile '{}' is configured more than once", spec.name));
            }
            specs.push(spec);
        }
        if specs.is_empty() {
            return Err("At least one database profile must be configured".to_string());
        }
        Ok(specs)
    }

    /// Decide once how connections reach their databases.
    pub fn tunnel_mode(&self) -> TunnelMode {
        if !self.use_ssh_tunnel {
            return TunnelMode::Direct;
        }

        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        let mut missing = Vec::new();
        if !present(&self.ssh_host) {
            missing.push("SSH_HOST".to_string());
        }
        if !present(&self.ssh_user) {
            missing.push("SSH_USER".to_string());
        }
        if self
            .ssh_key_path
            .as_ref()
            .is_none_or(|p| p.as_os_str().is_empty())
        {
            missing.push("SSH_KEY_PATH".to_string());
        }

        match (&self.ssh_host, &self.ssh_user, &self.ssh_key_path) {
            (Some(host), Some(user), Some(key)) if missing.is_empty() => {
                TunnelMode::Ssh(TunnelProfile {
                    ssh_host: host.trim().to_string(),
                    ssh_port: self.ssh_port,
                    ssh_user: user.trim().to_string(),
                    private_key_path: key.clone(),
                })
            }
            _ => TunnelMode::Misconfigured { missing },
        }
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
