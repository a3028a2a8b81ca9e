//! Integration tests against a live MySQL server.
//!
//! Set TEST_MYSQL_HOST, TEST_MYSQL_USER, TEST_MYSQL_PASSWORD and
//! TEST_MYSQL_DATABASE (optionally TEST_MYSQL_PORT) to run them.
//! Example: TEST_MYSQL_HOST=127.0.0.1 TEST_MYSQL_USER=root TEST_MYSQL_PASSWORD=root TEST_MYSQL_DATABASE=test_db

use mysql_mcp_gateway::config::{ConnectionSettings, GatewayOptions, SshSettings};
use mysql_mcp_gateway::db::{ConnectionGateway, SchemaCatalog};
use mysql_mcp_gateway::error::GatewayError;
use mysql_mcp_gateway::models::Statement;
use mysql_mcp_gateway::tools::QueryExecutor;
use mysql_mcp_gateway::tunnel::{TunnelLauncher, TunnelManager};
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};

/// Settings from TEST_MYSQL_*, or `None` when the server is not configured.
fn test_settings() -> Option<ConnectionSettings> {
    if std::env::var("TEST_MYSQL_HOST").is_err() {
        eprintln!("Skipping test: TEST_MYSQL_HOST not set");
        return None;
    }
    let settings = ConnectionSettings::from_lookup(|name| std::env::var(format!("TEST_{}", name)).ok())
        .expect("TEST_MYSQL_* variables are incomplete");
    Some(settings)
}

fn gateway_with(settings: ConnectionSettings, options: GatewayOptions) -> Arc<ConnectionGateway> {
    Arc::new(ConnectionGateway::new(Arc::new(settings), options))
}

async fn setup(executor: &QueryExecutor, statements: &[&str]) {
    for sql in statements {
        executor
            .run(sql)
            .await
            .unwrap_or_else(|e| panic!("setup failed for {}: {}", sql, e));
    }
}

#[tokio::test]
async fn test_select_one() {
    let Some(settings) = test_settings() else {
        return;
    };
    let gateway = gateway_with(settings, GatewayOptions::default());
    let executor = QueryExecutor::new(gateway.clone());

    let result = executor.run("SELECT 1 AS n").await.unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0]["n"], json!(1));
    assert_eq!(result.columns[0].name, "n");
    assert!(!result.truncated);
    assert!(!result.committed);

    assert!(gateway.is_connected().await);
    gateway.close().await;
    assert!(!gateway.is_connected().await);
}

#[tokio::test]
async fn test_reads_are_truncated_at_max_rows() {
    let Some(settings) = test_settings() else {
        return;
    };
    let options = GatewayOptions {
        max_rows: 3,
        ..GatewayOptions::default()
    };
    let gateway = gateway_with(settings, options);
    let executor = QueryExecutor::new(gateway.clone());

    setup(
        &executor,
        &[
            "DROP TABLE IF EXISTS mcpgw_truncate",
            "CREATE TABLE mcpgw_truncate (id INT PRIMARY KEY)",
            "INSERT INTO mcpgw_truncate VALUES (1), (2), (3), (4), (5)",
        ],
    )
    .await;

    let result = executor
        .run("SELECT id FROM mcpgw_truncate ORDER BY id")
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 3);
    assert!(result.truncated);

    let result = executor
        .run("SELECT id FROM mcpgw_truncate WHERE id > 2 ORDER BY id")
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 3);
    assert!(!result.truncated);

    setup(&executor, &["DROP TABLE mcpgw_truncate"]).await;
    gateway.close().await;
}

#[tokio::test]
async fn test_update_is_committed() {
    let Some(settings) = test_settings() else {
        return;
    };
    let gateway = gateway_with(settings.clone(), GatewayOptions::default());
    let executor = QueryExecutor::new(gateway.clone());

    setup(
        &executor,
        &[
            "DROP TABLE IF EXISTS mcpgw_commit",
            "CREATE TABLE mcpgw_commit (id INT AUTO_INCREMENT PRIMARY KEY, qty INT NOT NULL)",
        ],
    )
    .await;

    let insert = executor
        .run("INSERT INTO mcpgw_commit (qty) VALUES (1), (1)")
        .await
        .unwrap();
    assert!(insert.committed);
    assert_eq!(insert.rows_affected, Some(2));
    assert!(insert.last_insert_id.is_some());

    let update = executor
        .run("UPDATE mcpgw_commit SET qty = qty + 1")
        .await
        .unwrap();
    assert!(update.committed);
    assert_eq!(update.rows_affected, Some(2));
    gateway.close().await;

    // A fresh connection sees the change only if it was committed
    let other = gateway_with(settings, GatewayOptions::default());
    let result = QueryExecutor::new(other.clone())
        .run("SELECT SUM(qty) AS total FROM mcpgw_commit")
        .await
        .unwrap();
    assert_eq!(result.rows[0]["total"], json!("4"));

    QueryExecutor::new(other.clone())
        .run("DROP TABLE mcpgw_commit")
        .await
        .unwrap();
    other.close().await;
}

#[tokio::test]
async fn test_statement_error_keeps_connection() {
    let Some(settings) = test_settings() else {
        return;
    };
    let gateway = gateway_with(settings, GatewayOptions::default());
    let executor = QueryExecutor::new(gateway.clone());

    let err = executor
        .run("SELECT * FROM mcpgw_table_that_does_not_exist")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Query { .. }));
    assert!(err.is_missing_table());
    assert!(gateway.is_connected().await);

    // The server keeps serving after a failed statement
    assert!(executor.run("SELECT 1").await.is_ok());
    gateway.close().await;
}

#[tokio::test]
async fn test_read_only_rejects_writes() {
    let Some(settings) = test_settings() else {
        return;
    };
    let options = GatewayOptions {
        read_only: true,
        ..GatewayOptions::default()
    };
    let gateway = gateway_with(settings, options);
    let executor = QueryExecutor::new(gateway.clone());

    let err = executor
        .run("CREATE TABLE mcpgw_never (id INT)")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Permission { .. }));
    assert!(executor.run("SHOW TABLES").await.is_ok());
    gateway.close().await;
}

#[tokio::test]
async fn test_resources_list_read_and_dropped_table() {
    let Some(settings) = test_settings() else {
        return;
    };
    let gateway = gateway_with(settings, GatewayOptions::default());
    let executor = QueryExecutor::new(gateway.clone());
    let catalog = SchemaCatalog::new(gateway.clone());

    setup(
        &executor,
        &[
            "DROP TABLE IF EXISTS mcpgw_resource",
            "CREATE TABLE mcpgw_resource (id INT PRIMARY KEY, label VARCHAR(20)) COMMENT='resource test'",
            "INSERT INTO mcpgw_resource VALUES (1, 'a'), (2, NULL)",
        ],
    )
    .await;

    let resources = catalog.list_resources().await.unwrap();
    let resource = resources
        .iter()
        .find(|r| r.table_name == "mcpgw_resource")
        .expect("table listed");
    assert_eq!(resource.uri, "mysql://mcpgw_resource/data");
    assert_eq!(resource.comment.as_deref(), Some("resource test"));

    let preview = catalog
        .read_resource("mysql://mcpgw_resource/data")
        .await
        .unwrap();
    assert_eq!(preview.row_count, 2);
    assert!(!preview.truncated);
    assert_eq!(preview.columns.len(), 2);
    assert_eq!(preview.rows[1]["label"], serde_json::Value::Null);

    setup(&executor, &["DROP TABLE mcpgw_resource"]).await;
    let err = catalog
        .read_resource("mysql://mcpgw_resource/data")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound { .. }));

    let err = catalog.read_resource("mysql://mcpgw_resource").await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidInput { .. }));
    gateway.close().await;
}

#[tokio::test]
async fn test_schema_info_and_sample() {
    let Some(settings) = test_settings() else {
        return;
    };
    let gateway = gateway_with(settings, GatewayOptions::default());
    let executor = QueryExecutor::new(gateway.clone());
    let catalog = SchemaCatalog::new(gateway.clone());

    setup(
        &executor,
        &[
            "DROP TABLE IF EXISTS mcpgw_schema",
            "CREATE TABLE mcpgw_schema (
                id INT AUTO_INCREMENT PRIMARY KEY COMMENT '主键ID',
                name VARCHAR(100) NOT NULL DEFAULT 'x',
                note TEXT
            ) DEFAULT CHARSET=utf8mb4",
            "INSERT INTO mcpgw_schema (name, note) VALUES ('张三', '这是中文描述'), ('b', NULL), ('c', NULL)",
        ],
    )
    .await;

    let schemas = catalog.schema_info(Some("mcpgw_schema")).await.unwrap();
    assert_eq!(schemas.len(), 1);
    let schema = &schemas[0];
    assert_eq!(schema.primary_key, vec!["id".to_string()]);
    assert_eq!(schema.columns.len(), 3);
    assert_eq!(schema.columns[0].comment.as_deref(), Some("主键ID"));
    assert_eq!(schema.columns[0].extra.as_deref(), Some("auto_increment"));
    assert!(schema.columns[1].default_value.is_some());
    assert!(!schema.columns[1].nullable);
    assert!(schema.columns[2].nullable);

    let all = catalog.schema_info(None).await.unwrap();
    assert!(all.iter().any(|s| s.table_name == "mcpgw_schema"));

    let sample = catalog.table_sample("mcpgw_schema", Some(2)).await.unwrap();
    assert_eq!(sample.sample_size, 2);
    assert_eq!(sample.columns.len(), 3);
    assert_eq!(sample.rows[0]["name"], json!("张三"));
    assert_eq!(sample.rows[0]["note"], json!("这是中文描述"));

    let err = catalog.schema_info(Some("mcpgw_missing")).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotFound { .. }));

    setup(&executor, &["DROP TABLE mcpgw_schema"]).await;
    gateway.close().await;
}

#[tokio::test]
async fn test_wrong_password_is_terminal_and_redacted() {
    let Some(mut settings) = test_settings() else {
        return;
    };
    settings.password = "definitely-not-the-password-7f3a".to_string();
    let gateway = gateway_with(settings, GatewayOptions::default());

    let err = gateway.ping().await.unwrap_err();
    assert!(
        matches!(err, GatewayError::Database { retryable: false, .. }),
        "unexpected error: {}",
        err
    );
    assert!(!err.to_string().contains("definitely-not-the-password-7f3a"));
    assert!(!gateway.is_connected().await);
}

#[tokio::test]
async fn test_read_only_session_blocks_writes_at_server() {
    let Some(settings) = test_settings() else {
        return;
    };
    let writable = gateway_with(settings.clone(), GatewayOptions::default());
    let executor = QueryExecutor::new(writable.clone());
    setup(
        &executor,
        &[
            "DROP TABLE IF EXISTS mcpgw_read_only",
            "CREATE TABLE mcpgw_read_only (id INT PRIMARY KEY)",
            "INSERT INTO mcpgw_read_only VALUES (1)",
        ],
    )
    .await;

    let options = GatewayOptions {
        read_only: true,
        ..GatewayOptions::default()
    };
    let read_only = gateway_with(settings, options);
    // Bypasses statement checks; the session itself must refuse the write.
    let err = read_only
        .execute(&Statement::mutating("DELETE FROM mcpgw_read_only"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Database { .. }));
    read_only.close().await;

    let count = executor
        .run("SELECT COUNT(*) AS n FROM mcpgw_read_only")
        .await
        .unwrap();
    assert_eq!(count.rows[0]["n"], json!(1));

    setup(&executor, &["DROP TABLE mcpgw_read_only"]).await;
    writable.close().await;
}

#[tokio::test]
async fn test_empty_database_has_no_resources() {
    let Some(settings) = test_settings() else {
        return;
    };
    let admin = gateway_with(settings.clone(), GatewayOptions::default());
    let executor = QueryExecutor::new(admin.clone());
    setup(
        &executor,
        &[
            "DROP DATABASE IF EXISTS mcpgw_empty",
            "CREATE DATABASE mcpgw_empty",
        ],
    )
    .await;

    let mut empty = settings;
    empty.database = "mcpgw_empty".to_string();
    let gateway = gateway_with(empty, GatewayOptions::default());
    let catalog = SchemaCatalog::new(gateway.clone());

    assert!(catalog.list_resources().await.unwrap().is_empty());
    assert!(catalog.schema_info(None).await.unwrap().is_empty());
    gateway.close().await;

    setup(&executor, &["DROP DATABASE mcpgw_empty"]).await;
    admin.close().await;
}

/// Forwards the local port to the test server in-process; `sleep` plays ssh.
struct ProxyLauncher {
    target_host: String,
    target_port: u16,
}

impl TunnelLauncher for ProxyLauncher {
    fn launch(&self, _ssh: &SshSettings, local_port: u16) -> std::io::Result<Child> {
        let listener = std::net::TcpListener::bind(("127.0.0.1", local_port))?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        let target = (self.target_host.clone(), self.target_port);
        tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                let target = target.clone();
                tokio::spawn(async move {
                    if let Ok(mut outbound) = TcpStream::connect((target.0.as_str(), target.1)).await {
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    }
                });
            }
        });

        Command::new("sh")
            .arg("-c")
            .arg("exec sleep 30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

async fn connection_id(executor: &QueryExecutor) -> serde_json::Value {
    let result = executor.run("SELECT CONNECTION_ID() AS id").await.unwrap();
    result.rows[0]["id"].clone()
}

#[tokio::test]
async fn test_connection_is_not_reused_across_tunnel_restart() {
    let Some(mut settings) = test_settings() else {
        return;
    };
    let launcher = ProxyLauncher {
        target_host: settings.host.clone(),
        target_port: settings.port,
    };
    settings.ssh = Some(SshSettings {
        host: "bastion".to_string(),
        port: 22,
        user: "deploy".to_string(),
        key_path: PathBuf::from("/unused/id_ed25519"),
        remote_host: settings.host.clone(),
        remote_port: settings.port,
        local_port: None,
        binary: "ssh".to_string(),
        strict_host_key_checking: "accept-new".to_string(),
    });
    let settings = Arc::new(settings);
    let options = GatewayOptions::default();
    let tunnel = TunnelManager::with_launcher(Arc::clone(&settings), &options, Arc::new(launcher));
    let gateway = Arc::new(ConnectionGateway::with_tunnel(settings, options, tunnel));
    let executor = QueryExecutor::new(gateway.clone());

    let first = connection_id(&executor).await;
    assert_eq!(connection_id(&executor).await, first);

    // The old forward keeps working, so only the generation change can force a reconnect.
    let pid = gateway.tunnel().pid().await.unwrap();
    std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while gateway.tunnel().is_alive().await {
        assert!(Instant::now() < deadline, "killed tunnel still alive");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let second = connection_id(&executor).await;
    assert_ne!(first, second);
    assert_eq!(gateway.tunnel().ensure_tunnel().await.unwrap().generation, 2);
    assert_ne!(gateway.tunnel().pid().await, Some(pid));

    gateway.close().await;
    assert!(!gateway.tunnel().is_alive().await);
}
