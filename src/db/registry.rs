//! Named database profiles.
//!
//! The registry is built once at startup and shared read-only between requests.

use crate::config::{Config, ProfileSpec};
use crate::error::{DbError, DbResult};
use crate::models::{DEFAULT_MYSQL_PORT, DatabaseProfile, ProfileSummary};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    /// Kept in configuration order.
    profiles: Vec<DatabaseProfile>,
    default_profile: String,
}

impl ProfileRegistry {
    /// Build a registry from already-resolved profiles.
    pub fn new(
        profiles: Vec<DatabaseProfile>,
        default_profile: impl Into<String>,
    ) -> Result<Self, String> {
        let default_profile = default_profile.into();
        if !profiles.iter().any(|p| p.name == default_profile) {
            return Err(format!(
                "Default profile '{}' is not one of the configured profiles",
                default_profile
            ));
        }
        Ok(Self {
            profiles,
            default_profile,
        })
    }

    /// Read every profile's credentials from the process environment.
    pub fn from_env(config: &Config) -> Result<Self, String> {
        let specs = config.parse_profiles()?;
        Self::from_lookup(&specs, &config.default_profile, |key| {
            std::env::var(key).ok()
        })
    }

    /// Build profiles from `{PREFIX}_*` values supplied by `lookup`.
    pub fn from_lookup<F>(
        specs: &[ProfileSpec],
        default_profile: &str,
        lookup: F,
    ) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut profiles = Vec::with_capacity(specs.len());
        for spec in specs {
            let port_var = spec.port_var();
            let port = match lookup(&port_var).filter(|v| !v.trim().is_empty()) {
                Some(raw) => raw
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| format!("Invalid {}: '{}' is not a port number", port_var, raw))?,
                None => DEFAULT_MYSQL_PORT,
            };

            let profile = DatabaseProfile {
                name: spec.name.clone(),
                host: lookup(&spec.host_var()).unwrap_or_default().trim().to_string(),
                port,
                database: lookup(&spec.database_var())
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
                user: lookup(&spec.user_var()).unwrap_or_default().trim().to_string(),
                password: lookup(&spec.password_var()).unwrap_or_default(),
            };

            if profile.is_complete() {
                info!(profile = %profile.name, host = %profile.host, port = profile.port, "Profile configured");
            } else {
                warn!(
                    profile = %profile.name,
                    env_prefix = %spec.env_prefix,
                    missing = ?profile.missing_fields(),
                    "Profile incomplete; calls against it will fail"
                );
            }
            profiles.push(profile);
        }

        Self::new(profiles, default_profile)
    }

    /// Resolve a profile by name, falling back to the default profile.
    ///
    /// Fails with a configuration error when the name is unknown or the profile
    /// lacks host, user, password or database. No network activity happens here.
    pub fn resolve(&self, name: Option<&str>) -> DbResult<&DatabaseProfile> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.default_profile);

        let profile = self.profiles.iter().find(|p| p.name == name).ok_or_else(|| {
            DbError::config(format!(
                "Database '{}' is not a configured profile. Available: {}",
                name,
                self.names().join(", ")
            ))
        })?;

        let missing = profile.missing_fields();
        if !missing.is_empty() {
            return Err(DbError::config(format!(
                "Database '{}' not configured. Missing: {}. Please set the required environment variables.",
                name,
                missing.join(", ")
            )));
        }

        Ok(profile)
    }

    /// Profile names in configuration order.
    pub fn names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn default_profile(&self) -> &str {
        &self.default_profile
    }

    /// Secret-free description of every profile.
    pub fn summaries(&self) -> Vec<ProfileSummary> {
        self.profiles
            .iter()
            .map(|p| ProfileSummary {
                name: p.name.clone(),
                database: p.database.clone(),
                configured: p.is_complete(),
                is_default: p.name == self.default_profile,
            })
            .collect()
    }
}
