//! Database access layer.
//!
//! - `registry`: named profiles and their credentials
//! - `tunnel`: per-request SSH port forwards
//! - `connection`: request-scoped sessions and their release
//! - `executor`: validate, connect, run, release
//! - `types`: MySQL row to JSON conversion

pub mod connection;
pub mod executor;
pub mod registry;
pub mod tunnel;
pub mod types;

pub use connection::{
    ConnectTarget, ConnectionFactory, Connector, DbSession, LiveConnection, MySqlConnector,
    MySqlSession,
};
pub use executor::QueryExecutor;
pub use registry::ProfileRegistry;
pub use tunnel::{SshTunnel, SshTunnelManager, TUNNEL_BIND_ADDR, Tunnel, TunnelOpener};
