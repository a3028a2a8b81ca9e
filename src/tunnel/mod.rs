//! SSH local-forwarding tunnel lifecycle.
//!
//! [`TunnelManager`] owns at most one tunnel process. [`TunnelManager::ensure_tunnel`]
//! returns the endpoint the database driver should connect to, spawning or
//! replacing the process when needed.

mod command;
#[cfg(test)]
pub(crate) mod testing;

pub use command::{SshLauncher, TunnelLauncher};

use crate::config::{ConnectionSettings, GatewayOptions, SshSettings};
use crate::error::{GatewayError, GatewayResult};
use crate::logging::Redactor;
use crate::secure_log;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::sync::Mutex;

const LOOPBACK: &str = "127.0.0.1";
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long the process must survive after the port opens before it counts as ready.
const READY_SETTLE: Duration = Duration::from_millis(250);
const STDERR_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Where the database driver should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Tunnel generation the endpoint belongs to; 0 for a direct connection
    pub generation: u64,
}

impl Endpoint {
    fn direct(settings: &ConnectionSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            generation: 0,
        }
    }
}

/// A running tunnel process.
#[derive(Debug)]
pub struct TunnelHandle {
    child: Child,
    pid: Option<u32>,
    local_port: u16,
    generation: u64,
}

impl TunnelHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: LOOPBACK.to_string(),
            port: self.local_port,
            generation: self.generation,
        }
    }

    /// Non-blocking liveness check.
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(mut self, grace: Duration) {
        terminate_child(&mut self.child, self.pid, grace).await;
    }
}

#[derive(Debug, Default)]
struct TunnelState {
    handle: Option<TunnelHandle>,
    generation: u64,
}

/// Owns the tunnel process for one set of connection settings.
pub struct TunnelManager {
    settings: Arc<ConnectionSettings>,
    launcher: Arc<dyn TunnelLauncher>,
    redactor: Redactor,
    ready_timeout: Duration,
    teardown_timeout: Duration,
    state: Mutex<TunnelState>,
}

impl std::fmt::Debug for TunnelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelManager")
            .field("ssh_enabled", &self.settings.ssh_enabled())
            .field("ready_timeout", &self.ready_timeout)
            .field("teardown_timeout", &self.teardown_timeout)
            .finish()
    }
}

impl TunnelManager {
    /// Create a manager that launches the system ssh client.
    pub fn new(settings: Arc<ConnectionSettings>, options: &GatewayOptions) -> Self {
        Self::with_launcher(settings, options, Arc::new(SshLauncher))
    }

    /// Create a manager with a custom process launcher.
    pub fn with_launcher(
        settings: Arc<ConnectionSettings>,
        options: &GatewayOptions,
        launcher: Arc<dyn TunnelLauncher>,
    ) -> Self {
        let redactor = settings.redactor();
        Self {
            settings,
            launcher,
            redactor,
            ready_timeout: options.tunnel_timeout,
            teardown_timeout: options.tunnel_teardown_timeout,
            state: Mutex::new(TunnelState::default()),
        }
    }

    /// Return a usable endpoint, establishing or re-establishing the tunnel if needed.
    ///
    /// With SSH disabled this is the configured host and port. With SSH enabled a
    /// live tunnel is reused as is; a dead one is reaped and replaced.
    pub async fn ensure_tunnel(&self) -> GatewayResult<Endpoint> {
        let Some(ssh) = self.settings.ssh.as_ref() else {
            return Ok(Endpoint::direct(&self.settings));
        };

        let mut state = self.state.lock().await;

        if let Some(handle) = state.handle.as_mut() {
            if handle.is_running() {
                return Ok(handle.endpoint());
            }
            secure_log!(
                warn,
                "SSH tunnel process exited; re-establishing",
                pid = display_pid(handle.pid),
                generation = handle.generation
            );
        }
        if let Some(dead) = state.handle.take() {
            dead.terminate(self.teardown_timeout).await;
        }

        let local_port = match ssh.local_port {
            Some(port) => {
                ensure_port_free(port).await?;
                port
            }
            None => free_local_port().await?,
        };

        let handle = self.spawn(ssh, local_port, state.generation + 1).await?;
        state.generation = handle.generation;
        let endpoint = handle.endpoint();
        state.handle = Some(handle);
        Ok(endpoint)
    }

    async fn spawn(
        &self,
        ssh: &SshSettings,
        local_port: u16,
        generation: u64,
    ) -> GatewayResult<TunnelHandle> {
        secure_log!(
            info,
            "Starting SSH tunnel",
            ssh_host = ssh.host,
            ssh_port = ssh.port,
            ssh_user = ssh.user,
            remote = format!("{}:{}", ssh.remote_host, ssh.remote_port),
            local_port = local_port
        );

        let mut child = self.launcher.launch(ssh, local_port).map_err(|e| {
            GatewayError::tunnel(self.redactor.scrub(&format!(
                "failed to start '{}': {}",
                ssh.binary, e
            )))
        })?;
        let pid = child.id();

        if let Err(err) = self.wait_ready(&mut child, local_port).await {
            secure_log!(error, "SSH tunnel failed to start", error = err);
            terminate_child(&mut child, pid, self.teardown_timeout).await;
            return Err(err);
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr, pid));
        }

        secure_log!(
            info,
            "SSH tunnel established",
            pid = display_pid(pid),
            local_port = local_port,
            generation = generation
        );

        Ok(TunnelHandle {
            child,
            pid,
            local_port,
            generation,
        })
    }

    /// Poll the forwarded port until it accepts connections, the process dies,
    /// or the readiness timeout elapses.
    ///
    /// An open port alone is not enough: ssh binds the port only after
    /// authenticating and exits if the bind fails, so the process must still be
    /// running one settle interval after the port first answers.
    async fn wait_ready(&self, child: &mut Child, local_port: u16) -> GatewayResult<()> {
        let started = Instant::now();
        let mut port_open = false;
        loop {
            match child.try_wait() {
                Ok(None) if port_open => return Ok(()),
                Ok(Some(status)) => {
                    let stderr = read_stderr(child).await;
                    let detail = if stderr.is_empty() {
                        format!("tunnel process exited with {}", status)
                    } else {
                        format!("tunnel process exited with {}: {}", status, stderr)
                    };
                    return Err(GatewayError::tunnel(self.redactor.scrub(&detail)));
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(GatewayError::tunnel(format!(
                        "failed to check tunnel process: {}",
                        e
                    )));
                }
            }

            let probe =
                tokio::time::timeout(READY_POLL_INTERVAL, TcpStream::connect((LOOPBACK, local_port)))
                    .await;
            if let Ok(Ok(_stream)) = probe {
                port_open = true;
                tokio::time::sleep(READY_SETTLE).await;
                continue;
            }

            if started.elapsed() >= self.ready_timeout {
                return Err(GatewayError::tunnel(format!(
                    "local port {} not ready after {}s",
                    local_port,
                    self.ready_timeout.as_secs_f32()
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Check whether a tunnel process is currently running.
    pub async fn is_alive(&self) -> bool {
        let mut state = self.state.lock().await;
        state.handle.as_mut().is_some_and(TunnelHandle::is_running)
    }

    /// PID of the current tunnel process, if any.
    pub async fn pid(&self) -> Option<u32> {
        let state = self.state.lock().await;
        state.handle.as_ref().and_then(TunnelHandle::pid)
    }

    /// Stop the tunnel process. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let handle = self.state.lock().await.handle.take();
        if let Some(handle) = handle {
            secure_log!(info, "Stopping SSH tunnel", pid = display_pid(handle.pid));
            handle.terminate(self.teardown_timeout).await;
        }
    }
}

/// Kill the child and reap it, bounded by `grace`.
///
/// `kill_on_drop` covers the case where the wait times out.
async fn terminate_child(child: &mut Child, pid: Option<u32>, grace: Duration) {
    if let Err(e) = child.start_kill() {
        secure_log!(debug, "Tunnel process already gone", pid = display_pid(pid), error = e);
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            secure_log!(debug, "Tunnel process reaped", pid = display_pid(pid), status = status);
        }
        Ok(Err(e)) => {
            secure_log!(warn, "Failed to reap tunnel process", pid = display_pid(pid), error = e);
        }
        Err(_) => {
            secure_log!(
                warn,
                "Tunnel process did not exit in time",
                pid = display_pid(pid),
                timeout_secs = grace.as_secs()
            );
        }
    }
}

async fn read_stderr(child: &mut Child) -> String {
    let Some(mut stderr) = child.stderr.take() else {
        return String::new();
    };
    let mut buf = String::new();
    // A forked grandchild can keep the pipe open; never block on it.
    let _ = tokio::time::timeout(STDERR_READ_TIMEOUT, stderr.read_to_string(&mut buf)).await;
    buf.trim().to_string()
}

async fn drain_stderr(stderr: tokio::process::ChildStderr, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        secure_log!(debug, "ssh", pid = display_pid(pid), stderr = line);
    }
}

/// Fail if something already listens on a fixed local port.
///
/// Otherwise the readiness probe would reach that listener and the database
/// credentials would be sent to it.
async fn ensure_port_free(port: u16) -> GatewayResult<()> {
    tokio::net::TcpListener::bind((LOOPBACK, port))
        .await
        .map(drop)
        .map_err(|e| GatewayError::tunnel(format!("local port {} already in use: {}", port, e)))
}

/// Ask the OS for a free loopback port.
async fn free_local_port() -> GatewayResult<u16> {
    let listener = tokio::net::TcpListener::bind((LOOPBACK, 0))
        .await
        .map_err(|e| GatewayError::tunnel(format!("failed to pick a local port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| GatewayError::tunnel(format!("failed to pick a local port: {}", e)))?
        .port();
    Ok(port)
}

fn display_pid(pid: Option<u32>) -> String {
    pid.map_or_else(|| "unknown".to_string(), |p| p.to_string())
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptLauncher, kill};
    use super::*;
    use std::path::PathBuf;
    use std::process::Stdio;
    use tokio::net::TcpListener;

    fn settings(local_port: Option<u16>) -> Arc<ConnectionSettings> {
        Arc::new(ConnectionSettings {
            host: "db.internal".to_string(),
            port: 3306,
            user: "app".to_string(),
            password: "hunter2".to_string(),
            database: "shop".to_string(),
            charset: "utf8mb4".to_string(),
            collation: "utf8mb4_unicode_ci".to_string(),
            sql_mode: "TRADITIONAL".to_string(),
            ssh: Some(SshSettings {
                host: "bastion".to_string(),
                port: 22,
                user: "deploy".to_string(),
                key_path: PathBuf::from("/secret/keys/id_ed25519"),
                remote_host: "10.0.0.5".to_string(),
                remote_port: 3306,
                local_port,
                binary: "ssh".to_string(),
                strict_host_key_checking: "accept-new".to_string(),
            }),
        })
    }

    fn options(ready_ms: u64) -> GatewayOptions {
        GatewayOptions {
            tunnel_timeout: Duration::from_millis(ready_ms),
            tunnel_teardown_timeout: Duration::from_secs(2),
            ..GatewayOptions::default()
        }
    }

    fn manager(
        settings: Arc<ConnectionSettings>,
        ready_ms: u64,
        launcher: ScriptLauncher,
    ) -> TunnelManager {
        TunnelManager::with_launcher(settings, &options(ready_ms), Arc::new(launcher))
    }

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// A loopback port with nothing listening on it.
    async fn unused_port() -> u16 {
        let (listener, port) = listener().await;
        drop(listener);
        port
    }

    fn process_exists(pid: u32) -> bool {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_disabled_returns_direct_endpoint() {
        let mut plain = (*settings(None)).clone();
        plain.ssh = None;
        let manager = manager(Arc::new(plain), 1000, ScriptLauncher::new("exit 1"));

        let endpoint = manager.ensure_tunnel().await.unwrap();
        assert_eq!(
            endpoint,
            Endpoint {
                host: "db.internal".to_string(),
                port: 3306,
                generation: 0
            }
        );
        assert!(!manager.is_alive().await);
    }

    #[tokio::test]
    async fn test_ensure_tunnel_is_idempotent() {
        let port = unused_port().await;
        let manager = manager(
            settings(Some(port)),
            2000,
            ScriptLauncher::forwarding("exec sleep 30"),
        );

        let first = manager.ensure_tunnel().await.unwrap();
        let pid = manager.pid().await.unwrap();
        let second = manager.ensure_tunnel().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.host, LOOPBACK);
        assert_eq!(first.port, port);
        assert_eq!(first.generation, 1);
        assert_eq!(manager.pid().await, Some(pid));
        assert!(manager.is_alive().await);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_respawns_after_external_kill() {
        let manager = manager(settings(None), 2000, ScriptLauncher::forwarding("exec sleep 30"));

        let first = manager.ensure_tunnel().await.unwrap();
        let old_pid = manager.pid().await.unwrap();

        kill(old_pid);
        let deadline = Instant::now() + Duration::from_secs(2);
        while manager.is_alive().await {
            assert!(Instant::now() < deadline, "killed tunnel still reported alive");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let endpoint = manager.ensure_tunnel().await.unwrap();
        let new_pid = manager.pid().await.unwrap();
        assert_ne!(old_pid, new_pid);
        assert_eq!(first.generation, 1);
        assert_eq!(endpoint.generation, 2);
        assert!(manager.is_alive().await);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_fixed_port_already_in_use_is_rejected() {
        // Another server owns the port; its accept queue would satisfy a bare
        // connect probe while ssh fails to bind and exits.
        let (_foreign, port) = listener().await;
        let manager = manager(
            settings(Some(port)),
            2000,
            ScriptLauncher::new("sleep 0.3; exit 255"),
        );

        let err = manager.ensure_tunnel().await.unwrap_err();
        assert!(matches!(err, GatewayError::Tunnel { .. }));
        assert!(err.to_string().contains("already in use"));
        assert!(!manager.is_alive().await);
        assert!(manager.pid().await.is_none());
    }

    #[tokio::test]
    async fn test_exit_after_port_opens_is_not_ready() {
        let manager = manager(
            settings(None),
            2000,
            ScriptLauncher::forwarding(
                "sleep 0.05; echo 'bind [127.0.0.1]: Address already in use' >&2; exit 255",
            ),
        );

        let err = manager.ensure_tunnel().await.unwrap_err();
        assert!(matches!(err, GatewayError::Tunnel { .. }));
        assert!(err.to_string().contains("Address already in use"));
        assert!(manager.pid().await.is_none());
    }

    #[tokio::test]
    async fn test_readiness_timeout_kills_process() {
        let port = unused_port().await;
        let manager = manager(
            settings(Some(port)),
            300,
            ScriptLauncher::new("echo $$ >&2; exec sleep 30"),
        );

        let err = manager.ensure_tunnel().await.unwrap_err();
        assert!(matches!(err, GatewayError::Tunnel { .. }));
        assert!(err.to_string().contains("not ready"));
        assert!(!manager.is_alive().await);
        assert!(manager.pid().await.is_none());
    }

    #[tokio::test]
    async fn test_early_exit_reports_stderr_without_secrets() {
        let port = unused_port().await;
        let manager = manager(
            settings(Some(port)),
            2000,
            ScriptLauncher::new(
                "echo 'Load key \"/secret/keys/id_ed25519\": Permission denied' >&2; exit 255",
            ),
        );

        let err = manager.ensure_tunnel().await.unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, GatewayError::Tunnel { .. }));
        assert!(message.contains("Permission denied"));
        assert!(!message.contains("/secret/keys/id_ed25519"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_reaps() {
        let port = unused_port().await;
        let manager = manager(
            settings(Some(port)),
            2000,
            ScriptLauncher::forwarding("exec sleep 30"),
        );

        manager.ensure_tunnel().await.unwrap();
        let pid = manager.pid().await.unwrap();

        manager.shutdown().await;
        manager.shutdown().await;

        assert!(!manager.is_alive().await);
        assert!(!process_exists(pid));
    }

    #[tokio::test]
    async fn test_free_local_port_is_nonzero() {
        let port = free_local_port().await.unwrap();
        assert_ne!(port, 0);
    }

    #[tokio::test]
    async fn test_ensure_port_free() {
        let (held, port) = listener().await;
        assert!(ensure_port_free(port).await.is_err());
        drop(held);
        assert!(ensure_port_free(port).await.is_ok());
    }
}
