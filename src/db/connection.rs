//! Request-scoped database connections.
//!
//! There is no pool: every request gets its own `LiveConnection`, made of one
//! driver session and, in tunnel mode, the tunnel that session runs through.
//! `ConnectionFactory::release` is the single place that tears both down.

use crate::db::registry::ProfileRegistry;
use crate::db::tunnel::{SshTunnelManager, TUNNEL_BIND_ADDR, Tunnel, TunnelOpener};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseProfile, JsonRow, TunnelMode};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::Connection;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where the driver should connect, with the profile's credentials.
#[derive(Debug, Clone, Copy)]
pub struct ConnectTarget<'a> {
    pub host: &'a str,
    pub port: u16,
    pub profile: &'a DatabaseProfile,
}

/// An open database session.
pub trait DbSession: Send {
    /// Run one statement and return every row it produced.
    fn fetch_rows(&mut self, sql: &str) -> impl Future<Output = DbResult<Vec<JsonRow>>> + Send;

    /// Close the session.
    fn close(self) -> impl Future<Output = DbResult<()>> + Send;
}

/// Opens database sessions.
pub trait Connector: Send + Sync {
    type Session: DbSession;

    fn connect(
        &self,
        target: ConnectTarget<'_>,
    ) -> impl Future<Output = DbResult<Self::Session>> + Send;
}

/// sqlx MySQL connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnector;

impl Connector for MySqlConnector {
    type Session = MySqlSession;

    async fn connect(&self, target: ConnectTarget<'_>) -> DbResult<MySqlSession> {
        let profile = target.profile;
        let options = MySqlConnectOptions::new()
            .host(target.host)
            .port(target.port)
            .username(&profile.user)
            .password(&profile.password)
            .database(&profile.database);

        let conn = MySqlConnection::connect_with(&options)
            .await
            .map_err(|e| DbError::from_connect(&profile.name, e))?;
        Ok(MySqlSession(conn))
    }
}

/// A single sqlx MySQL connection.
pub struct MySqlSession(MySqlConnection);

impl DbSession for MySqlSession {
    async fn fetch_rows(&mut self, sql: &str) -> DbResult<Vec<JsonRow>> {
        // Prepared protocol: the server accepts exactly one statement per call.
        let rows = sqlx::query(sql)
            .persistent(false)
            .fetch_all(&mut self.0)
            .await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    async fn close(self) -> DbResult<()> {
        self.0.close().await.map_err(DbError::from)
    }
}

/// A database session owned by exactly one request, plus its tunnel if any.
pub struct LiveConnection<S, T> {
    profile: String,
    session: S,
    tunnel: Option<T>,
}

impl<S: DbSession, T: Tunnel> LiveConnection<S, T> {
    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn is_tunnelled(&self) -> bool {
        self.tunnel.is_some()
    }
}

/// Produces `LiveConnection`s for named profiles and releases them.
pub struct ConnectionFactory<C = MySqlConnector, T = SshTunnelManager> {
    registry: Arc<ProfileRegistry>,
    tunnel_mode: TunnelMode,
    connector: C,
    tunnels: T,
}

impl ConnectionFactory {
    /// Factory using the MySQL driver and russh tunnels.
    pub fn mysql(registry: Arc<ProfileRegistry>, tunnel_mode: TunnelMode) -> Self {
        Self::new(registry, tunnel_mode, MySqlConnector, SshTunnelManager::new())
    }
}

impl<C: Connector, T: TunnelOpener> ConnectionFactory<C, T> {
    pub fn new(
        registry: Arc<ProfileRegistry>,
        tunnel_mode: TunnelMode,
        connector: C,
        tunnels: T,
    ) -> Self {
        Self {
            registry,
            tunnel_mode,
            connector,
            tunnels,
        }
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn tunnel_mode(&self) -> &TunnelMode {
        &self.tunnel_mode
    }

    /// Open a session for `profile_name` (or the default profile).
    ///
    /// In tunnel mode the tunnel is opened first and closed again if the driver
    /// cannot connect through it, so a failed call never leaves anything open.
    pub async fn connect(
        &self,
        profile_name: Option<&str>,
    ) -> DbResult<LiveConnection<C::Session, T::Tunnel>> {
        let profile = self.registry.resolve(profile_name)?;

        match &self.tunnel_mode {
            TunnelMode::Direct => {
                debug!(profile = %profile.name, host = %profile.host, port = profile.port, "Connecting directly");
                let session = self
                    .connector
                    .connect(ConnectTarget {
                        host: &profile.host,
                        port: profile.port,
                        profile,
                    })
                    .await?;
                Ok(LiveConnection {
                    profile: profile.name.clone(),
                    session,
                    tunnel: None,
                })
            }
            TunnelMode::Misconfigured { missing } => Err(DbError::config(format!(
                "SSH tunnel enabled but SSH configuration incomplete. Please set {}.",
                missing.join(", ")
            ))),
            TunnelMode::Ssh(tunnel_profile) => {
                let tunnel = self.tunnels.open(tunnel_profile, profile).await?;
                let local_host = TUNNEL_BIND_ADDR.to_string();
                let target = ConnectTarget {
                    host: &local_host,
                    port: tunnel.local_port(),
                    profile,
                };
                debug!(profile = %profile.name, local_port = target.port, "Connecting through tunnel");

                match self.connector.connect(target).await {
                    Ok(session) => Ok(LiveConnection {
                        profile: profile.name.clone(),
                        session,
                        tunnel: Some(tunnel),
                    }),
                    Err(e) => {
                        tunnel.close().await;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Close the session, then the tunnel. Both steps always run; failures are logged only.
    pub async fn release(&self, conn: LiveConnection<C::Session, T::Tunnel>) {
        let LiveConnection {
            profile,
            session,
            tunnel,
        } = conn;

        if let Err(e) = session.close().await {
            warn!(profile = %profile, error = %e, "Failed to close database session");
        }
        if let Some(tunnel) = tunnel {
            tunnel.close().await;
        }
        debug!(profile = %profile, "Connection released");
    }
}
