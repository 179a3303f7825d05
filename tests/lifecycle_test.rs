//! Integration tests for connection acquisition and release.
//!
//! A scripted connector and tunnel opener count every open and close, so these
//! tests check that each request opens at most one session and one tunnel and
//! always closes what it opened, without a database or SSH server.

use qa_db_mcp_server::db::{
    ConnectTarget, ConnectionFactory, Connector, DbSession, ProfileRegistry, QueryExecutor,
    SshTunnelManager, Tunnel, TunnelOpener,
};
use qa_db_mcp_server::error::{DbError, DbResult};
use qa_db_mcp_server::models::{DatabaseProfile, DbRequest, JsonRow, TunnelMode, TunnelProfile};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const TUNNEL_PORT: u16 = 40123;

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    session_closes: AtomicUsize,
    tunnel_opens: AtomicUsize,
    tunnel_closes: AtomicUsize,
    targets: Mutex<Vec<(String, u16)>>,
    executed: Mutex<Vec<String>>,
}

impl Counters {
    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
    fn session_closes(&self) -> usize {
        self.session_closes.load(Ordering::SeqCst)
    }
    fn tunnel_opens(&self) -> usize {
        self.tunnel_opens.load(Ordering::SeqCst)
    }
    fn tunnel_closes(&self) -> usize {
        self.tunnel_closes.load(Ordering::SeqCst)
    }
    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
    fn targets(&self) -> Vec<(String, u16)> {
        self.targets.lock().unwrap().clone()
    }
}

#[derive(Clone, Copy, Default)]
struct Script {
    fail_connect: bool,
    fail_statement: bool,
    fail_close: bool,
    fail_tunnel: bool,
}

struct ScriptedConnector {
    counters: Arc<Counters>,
    script: Script,
}

struct ScriptedSession {
    counters: Arc<Counters>,
    script: Script,
}

fn row(value: serde_json::Value) -> JsonRow {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    async fn connect(&self, target: ConnectTarget<'_>) -> DbResult<ScriptedSession> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        self.counters
            .targets
            .lock()
            .unwrap()
            .push((target.host.to_string(), target.port));
        if self.script.fail_connect {
            return Err(DbError::connection(
                &target.profile.name,
                "Access denied",
                "Check credentials",
            ));
        }
        Ok(ScriptedSession {
            counters: self.counters.clone(),
            script: self.script,
        })
    }
}

impl DbSession for ScriptedSession {
    async fn fetch_rows(&mut self, sql: &str) -> DbResult<Vec<JsonRow>> {
        self.counters.executed.lock().unwrap().push(sql.to_string());
        if self.script.fail_statement {
            return Err(DbError::query(
                "Table 'gateway.missing' doesn't exist",
                Some("42S02".to_string()),
                "Check the table name",
            ));
        }
        if sql.starts_with("SELECT COUNT(*)") {
            // The count may come back as a numeric string.
            return Ok(vec![row(json!({"total": "42"}))]);
        }
        if sql.starts_with("SHOW INDEXES") {
            return Ok(vec![row(json!({"Key_name": "PRIMARY", "Column_name": "id"}))]);
        }
        Ok(vec![
            row(json!({"id": 1, "name": "a"})),
            row(json!({"id": 2, "name": "b"})),
        ])
    }

    async fn close(self) -> DbResult<()> {
        self.counters.session_closes.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_close {
            return Err(DbError::internal("connection reset during close"));
        }
        Ok(())
    }
}

struct ScriptedTunnels {
    counters: Arc<Counters>,
    script: Script,
}

struct ScriptedTunnel {
    counters: Arc<Counters>,
}

impl TunnelOpener for ScriptedTunnels {
    type Tunnel = ScriptedTunnel;

    async fn open(
        &self,
        tunnel: &TunnelProfile,
        target: &DatabaseProfile,
    ) -> DbResult<ScriptedTunnel> {
        if self.script.fail_tunnel {
            return Err(DbError::tunnel(
                &target.name,
                &tunnel.ssh_host,
                "SSH authentication rejected",
            ));
        }
        self.counters.tunnel_opens.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedTunnel {
            counters: self.counters.clone(),
        })
    }
}

impl Tunnel for ScriptedTunnel {
    fn local_port(&self) -> u16 {
        TUNNEL_PORT
    }

    async fn close(self) {
        self.counters.tunnel_closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn registry() -> Arc<ProfileRegistry> {
    let gateway = DatabaseProfile {
        name: "gateway".to_string(),
        host: "db.internal".to_string(),
        port: 3307,
        database: "gateway".to_string(),
        user: "reader".to_string(),
        password: "secret".to_string(),
    };
    let incomplete = DatabaseProfile {
        name: "evp_lt".to_string(),
        host: String::new(),
        port: 3306,
        database: String::new(),
        user: String::new(),
        password: String::new(),
    };
    Arc::new(ProfileRegistry::new(vec![gateway, incomplete], "gateway").unwrap())
}

fn ssh_mode(key: PathBuf) -> TunnelMode {
    TunnelMode::Ssh(TunnelProfile {
        ssh_host: "bastion.example.com".to_string(),
        ssh_port: 22,
        ssh_user: "deploy".to_string(),
        private_key_path: key,
    })
}

fn executor(
    mode: TunnelMode,
    script: Script,
) -> (QueryExecutor<ScriptedConnector, ScriptedTunnels>, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let factory = ConnectionFactory::new(
        registry(),
        mode,
        ScriptedConnector {
            counters: counters.clone(),
            script,
        },
        ScriptedTunnels {
            counters: counters.clone(),
            script,
        },
    );
    (QueryExecutor::new(factory), counters)
}

fn select(sql: &str) -> DbRequest {
    DbRequest::Query {
        profile: None,
        query: sql.to_string(),
        limit: None,
    }
}

#[tokio::test]
async fn test_non_select_opens_nothing() {
    for mode in [TunnelMode::Direct, ssh_mode(PathBuf::from("/keys/id"))] {
        let (executor, counters) = executor(mode, Script::default());
        let err = executor.run(select("DELETE FROM users")).await.unwrap_err();
        assert!(matches!(err, DbError::Validation { .. }));
        assert_eq!(counters.connects(), 0);
        assert_eq!(counters.tunnel_opens(), 0);
    }
}

#[tokio::test]
async fn test_bad_identifier_opens_nothing() {
    let (executor, counters) = executor(ssh_mode(PathBuf::from("/keys/id")), Script::default());
    let requests = [
        DbRequest::DescribeTable {
            profile: None,
            table_name: "users; DROP TABLE x".to_string(),
        },
        DbRequest::GetTableData {
            profile: None,
            table_name: "users; DROP TABLE x".to_string(),
            limit: None,
            where_clause: None,
        },
    ];
    for request in requests {
        let err = executor.run(request).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
    assert_eq!(counters.connects(), 0);
    assert_eq!(counters.tunnel_opens(), 0);
}

#[tokio::test]
async fn test_stacked_statements_never_reach_session() {
    let (executor, counters) = executor(ssh_mode(PathBuf::from("/keys/id")), Script::default());

    let err = executor
        .run(select("SELECT 1 LIMIT 1; DELETE FROM users"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    let err = executor
        .run(DbRequest::GetTableData {
            profile: None,
            table_name: "orders".to_string(),
            limit: None,
            where_clause: Some("1=1; DELETE FROM users WHERE 1".to_string()),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");

    assert!(counters.executed().is_empty());
    assert_eq!(counters.tunnel_opens(), 0);
    assert_eq!(counters.connects(), 0);
}

#[tokio::test]
async fn test_direct_mode_connects_to_profile_host() {
    let (executor, counters) = executor(TunnelMode::Direct, Script::default());
    let result = executor.run(select("SELECT * FROM users")).await.unwrap();

    assert_eq!(result.profile, "gateway");
    assert_eq!(result.row_count, 2);
    assert_eq!(result.query.as_deref(), Some("SELECT * FROM users LIMIT 100"));
    assert_eq!(counters.executed(), vec!["SELECT * FROM users LIMIT 100"]);
    assert_eq!(counters.targets(), vec![("db.internal".to_string(), 3307)]);
    assert_eq!(counters.connects(), 1);
    assert_eq!(counters.session_closes(), 1);
    assert_eq!(counters.tunnel_opens(), 0);
    assert_eq!(counters.tunnel_closes(), 0);
}

#[tokio::test]
async fn test_tunnel_mode_connects_through_local_port() {
    let (executor, counters) = executor(ssh_mode(PathBuf::from("/keys/id")), Script::default());
    let result = executor
        .run(DbRequest::ListTables { profile: None })
        .await
        .unwrap();

    assert_eq!(result.query.as_deref(), Some("SHOW TABLES"));
    assert_eq!(counters.targets(), vec![("127.0.0.1".to_string(), TUNNEL_PORT)]);
    assert_eq!(counters.executed(), vec!["SHOW TABLES"]);
    assert_eq!(counters.connects(), 1);
    assert_eq!(counters.session_closes(), 1);
    assert_eq!(counters.tunnel_opens(), 1);
    assert_eq!(counters.tunnel_closes(), 1);
}

#[tokio::test]
async fn test_query_failure_still_releases_everything() {
    let script = Script {
        fail_statement: true,
        ..Script::default()
    };
    let (executor, counters) = executor(ssh_mode(PathBuf::from("/keys/id")), script);
    let err = executor.run(select("SELECT * FROM missing")).await.unwrap_err();

    match err {
        DbError::Query { sql_state, .. } => assert_eq!(sql_state.as_deref(), Some("42S02")),
        other => panic!("expected query error, got {other:?}"),
    }
    assert_eq!(counters.session_closes(), 1);
    assert_eq!(counters.tunnel_closes(), 1);
}

#[tokio::test]
async fn test_connect_failure_closes_tunnel() {
    let script = Script {
        fail_connect: true,
        ..Script::default()
    };
    let (executor, counters) = executor(ssh_mode(PathBuf::from("/keys/id")), script);
    let err = executor.run(select("SELECT 1")).await.unwrap_err();

    assert_eq!(err.kind(), "connection");
    assert_eq!(counters.tunnel_opens(), 1);
    assert_eq!(counters.tunnel_closes(), 1);
    assert_eq!(counters.session_closes(), 0);
}

#[tokio::test]
async fn test_tunnel_failure_skips_connect() {
    let script = Script {
        fail_tunnel: true,
        ..Script::default()
    };
    let (executor, counters) = executor(ssh_mode(PathBuf::from("/keys/id")), script);
    let err = executor.run(select("SELECT 1")).await.unwrap_err();

    match err {
        DbError::Tunnel {
            profile, ssh_host, ..
        } => {
            assert_eq!(profile, "gateway");
            assert_eq!(ssh_host, "bastion.example.com");
        }
        other => panic!("expected tunnel error, got {other:?}"),
    }
    assert_eq!(counters.connects(), 0);
}

#[tokio::test]
async fn test_close_failure_does_not_replace_result() {
    let script = Script {
        fail_close: true,
        ..Script::default()
    };
    let (executor, counters) = executor(ssh_mode(PathBuf::from("/keys/id")), script);
    let result = executor.run(select("SELECT * FROM users")).await.unwrap();

    assert_eq!(result.row_count, 2);
    assert_eq!(counters.session_closes(), 1);
    assert_eq!(counters.tunnel_closes(), 1);
}

#[tokio::test]
async fn test_close_failure_does_not_replace_query_error() {
    let script = Script {
        fail_statement: true,
        fail_close: true,
        ..Script::default()
    };
    let (executor, _counters) = executor(TunnelMode::Direct, script);
    let err = executor.run(select("SELECT 1")).await.unwrap_err();
    assert_eq!(err.kind(), "query");
}

#[tokio::test]
async fn test_config_errors_open_nothing() {
    let (executor, counters) = executor(ssh_mode(PathBuf::from("/keys/id")), Script::default());

    let err = executor
        .run(DbRequest::ListTables {
            profile: Some("evp_lt".to_string()),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "config");
    assert!(err.to_string().contains("Missing"));

    let err = executor
        .run(DbRequest::ListTables {
            profile: Some("billing".to_string()),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "config");

    assert_eq!(counters.tunnel_opens(), 0);
    assert_eq!(counters.connects(), 0);
}

#[tokio::test]
async fn test_misconfigured_tunnel_opens_nothing() {
    let mode = TunnelMode::Misconfigured {
        missing: vec!["SSH_HOST".to_string(), "SSH_KEY_PATH".to_string()],
    };
    let (executor, counters) = executor(mode, Script::default());
    let err = executor.run(select("SELECT 1")).await.unwrap_err();

    assert_eq!(err.kind(), "config");
    assert!(err.to_string().contains("SSH_HOST, SSH_KEY_PATH"));
    assert_eq!(counters.tunnel_opens(), 0);
    assert_eq!(counters.connects(), 0);
}

#[tokio::test]
async fn test_table_data_reports_total_and_filter() {
    let (executor, counters) = executor(TunnelMode::Direct, Script::default());
    let result = executor
        .run(DbRequest::GetTableData {
            profile: Some("gateway".to_string()),
            table_name: "orders".to_string(),
            limit: None,
            where_clause: Some("status = 'open'".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(result.table.as_deref(), Some("orders"));
    assert_eq!(
        result.query.as_deref(),
        Some("SELECT * FROM `orders` WHERE status = 'open' LIMIT 10")
    );
    assert_eq!(result.row_count, 2);
    assert_eq!(result.total_row_count, Some(42));
    assert_eq!(result.limit, Some(10));
    assert_eq!(result.where_clause.as_deref(), Some("status = 'open'"));
    assert_eq!(
        counters.executed(),
        vec![
            "SELECT * FROM `orders` WHERE status = 'open' LIMIT 10",
            "SELECT COUNT(*) as total FROM `orders` WHERE status = 'open'",
        ]
    );
    assert_eq!(counters.connects(), 1);
    assert_eq!(counters.session_closes(), 1);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["where"], "status = 'open'");
    assert_eq!(json["total_row_count"], 42);
}

#[tokio::test]
async fn test_describe_table_returns_indexes() {
    let (executor, counters) = executor(TunnelMode::Direct, Script::default());
    let result = executor
        .run(DbRequest::DescribeTable {
            profile: None,
            table_name: "users".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(result.query.as_deref(), Some("DESCRIBE `users`"));
    let indexes = result.indexes.unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0]["Key_name"], "PRIMARY");
    assert_eq!(
        counters.executed(),
        vec!["DESCRIBE `users`", "SHOW INDEXES FROM `users`"]
    );
}

/// A missing key file fails inside the real tunnel manager before any
/// database connect is attempted.
#[tokio::test]
async fn test_missing_ssh_key_fails_before_connect() {
    let counters = Arc::new(Counters::default());
    let factory = ConnectionFactory::new(
        registry(),
        ssh_mode(PathBuf::from("/nonexistent/keys/id_ed25519")),
        ScriptedConnector {
            counters: counters.clone(),
            script: Script::default(),
        },
        SshTunnelManager::new(),
    );
    let executor = QueryExecutor::new(factory);

    let err = executor.run(select("SELECT 1")).await.unwrap_err();
    assert_eq!(err.kind(), "tunnel");
    assert_eq!(counters.connects(), 0);
}
