//! Lifecycle of the single database connection.
//!
//! [`ConnectionGateway`] caches one `MySqlConnection` across requests. Every
//! operation holds the gateway lock for its whole duration, so requests are
//! serialised and the connection is never used concurrently.

use crate::config::{ConnectionSettings, GatewayOptions};
use crate::db::executor;
use crate::error::{GatewayError, GatewayResult};
use crate::logging::Redactor;
use crate::models::{QueryResult, Statement};
use crate::secure_log;
use crate::tunnel::{Endpoint, TunnelManager};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection};
use std::sync::Arc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tokio::time::timeout;

struct CachedConnection {
    conn: MySqlConnection,
    endpoint: Endpoint,
}

/// Owner of the database connection and, through [`TunnelManager`], the tunnel.
pub struct ConnectionGateway {
    settings: Arc<ConnectionSettings>,
    options: GatewayOptions,
    tunnel: TunnelManager,
    redactor: Redactor,
    state: Mutex<Option<CachedConnection>>,
}

impl std::fmt::Debug for ConnectionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGateway")
            .field("settings", &self.settings)
            .field("options", &self.options)
            .field("tunnel", &self.tunnel)
            .finish()
    }
}

impl ConnectionGateway {
    /// Create a gateway that tunnels through the system ssh client when enabled.
    pub fn new(settings: Arc<ConnectionSettings>, options: GatewayOptions) -> Self {
        let tunnel = TunnelManager::new(Arc::clone(&settings), &options);
        Self::with_tunnel(settings, options, tunnel)
    }

    /// Create a gateway around an existing tunnel manager.
    pub fn with_tunnel(
        settings: Arc<ConnectionSettings>,
        options: GatewayOptions,
        tunnel: TunnelManager,
    ) -> Self {
        let redactor = settings.redactor();
        Self {
            settings,
            options,
            tunnel,
            redactor,
            state: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn tunnel(&self) -> &TunnelManager {
        &self.tunnel
    }

    /// Get a live connection, reconnecting (and re-tunnelling) as needed.
    ///
    /// The returned guard holds the gateway lock; drop it before calling any
    /// other gateway method.
    pub async fn get_connection(&self) -> GatewayResult<MappedMutexGuard<'_, MySqlConnection>> {
        let mut slot = self.state.lock().await;
        self.connect_slot(&mut slot).await?;
        MutexGuard::try_map(slot, |slot| slot.as_mut().map(|cached| &mut cached.conn))
            .map_err(|_| GatewayError::internal("connection slot empty after connect"))
    }

    /// Run a statement on the cached connection.
    ///
    /// Connection-level failures and timeouts drop the connection so the next
    /// call reconnects; statement errors leave it in place.
    pub async fn execute(&self, statement: &Statement) -> GatewayResult<QueryResult> {
        let mut slot = self.state.lock().await;
        let conn = self.connect_slot(&mut slot).await?;

        let result = executor::run(conn, statement, self.options.query_timeout, &self.redactor).await;

        if let Err(err) = &result {
            if err.invalidates_connection() {
                secure_log!(warn, "Discarding database connection", error = err);
                *slot = None;
            }
        }
        result
    }

    /// Verify that a live connection can be obtained.
    pub async fn ping(&self) -> GatewayResult<()> {
        let mut slot = self.state.lock().await;
        self.connect_slot(&mut slot).await.map(|_| ())
    }

    /// True if a connection is currently cached.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Close the connection gracefully and stop the tunnel.
    pub async fn close(&self) {
        let cached = self.state.lock().await.take();
        if let Some(cached) = cached {
            match timeout(self.options.connect_timeout, cached.conn.close()).await {
                Ok(Ok(())) => secure_log!(info, "Database connection closed"),
                Ok(Err(e)) => secure_log!(
                    warn,
                    "Error closing database connection",
                    error = self.redactor.scrub(&e.to_string())
                ),
                Err(_) => secure_log!(warn, "Timed out closing database connection"),
            }
        }
        self.tunnel.shutdown().await;
    }

    /// Make sure `slot` holds a usable connection and return it.
    async fn connect_slot<'s>(
        &self,
        slot: &'s mut Option<CachedConnection>,
    ) -> GatewayResult<&'s mut MySqlConnection> {
        let endpoint = match self.tunnel.ensure_tunnel().await {
            Ok(endpoint) => endpoint,
            Err(err) => {
                *slot = None;
                return Err(err);
            }
        };

        let reusable = match slot.take() {
            Some(cached) if cached.endpoint != endpoint => {
                secure_log!(
                    info,
                    "Tunnel changed; dropping stale connection",
                    old_generation = cached.endpoint.generation,
                    new_generation = endpoint.generation
                );
                None
            }
            Some(mut cached) => {
                match timeout(self.options.connect_timeout, cached.conn.ping()).await {
                    Ok(Ok(())) => Some(cached),
                    Ok(Err(e)) => {
                        secure_log!(
                            warn,
                            "Cached connection failed ping; reconnecting",
                            error = self.redactor.scrub(&e.to_string())
                        );
                        None
                    }
                    Err(_) => {
                        secure_log!(warn, "Cached connection ping timed out; reconnecting");
                        None
                    }
                }
            }
            None => None,
        };

        let cached = match reusable {
            Some(cached) => cached,
            None => CachedConnection {
                conn: self.open(&endpoint).await?,
                endpoint,
            },
        };
        Ok(&mut slot.insert(cached).conn)
    }

    async fn open(&self, endpoint: &Endpoint) -> GatewayResult<MySqlConnection> {
        let settings = &self.settings;
        secure_log!(
            info,
            "Opening database connection",
            host = endpoint.host,
            port = endpoint.port,
            database = settings.database,
            user = settings.user,
            tunnel_generation = endpoint.generation
        );

        let connect_options = MySqlConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.database)
            .charset(&settings.charset)
            .collation(&settings.collation);

        let map_err = |e: sqlx::Error| GatewayError::from_connect(e, |s| self.redactor.scrub(s));

        let connect = async {
            let mut conn = connect_options.connect().await.map_err(map_err)?;
            sqlx::query("SET SESSION sql_mode = ?")
                .bind(settings.sql_mode.as_str())
                .execute(&mut conn)
                .await
                .map_err(map_err)?;
            if self.options.read_only {
                // Server-side backstop for writes hidden inside read statements
                sqlx::query("SET SESSION TRANSACTION READ ONLY")
                    .execute(&mut conn)
                    .await
                    .map_err(map_err)?;
            }
            Ok::<_, GatewayError>(conn)
        };

        match timeout(self.options.connect_timeout, connect).await {
            Ok(Ok(conn)) => {
                secure_log!(
                    debug,
                    "Database connection ready",
                    sql_mode = settings.sql_mode,
                    read_only = self.options.read_only
                );
                Ok(conn)
            }
            Ok(Err(err)) => {
                secure_log!(error, "Database connection failed", error = err);
                Err(err)
            }
            Err(_) => {
                let err =
                    GatewayError::timeout("database connect", self.options.connect_timeout.as_secs());
                secure_log!(error, "Database connection timed out", error = err);
                Err(err)
            }
        }
    }
}
