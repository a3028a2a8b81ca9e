//! Launching the tunnel process.

use crate::config::SshSettings;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Seconds between keepalive probes sent by the ssh client.
const SERVER_ALIVE_INTERVAL_SECS: u32 = 30;

/// Starts the process that forwards `127.0.0.1:<local_port>` to the remote database.
///
/// The returned child must have stderr piped and `kill_on_drop` set; the
/// [`TunnelManager`](super::TunnelManager) relies on both.
pub trait TunnelLauncher: Send + Sync {
    fn launch(&self, ssh: &SshSettings, local_port: u16) -> std::io::Result<Child>;
}

/// Launches the system `ssh` client in local-forwarding mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshLauncher;

impl SshLauncher {
    /// Build the `ssh -N -L` invocation without spawning it.
    pub fn command(ssh: &SshSettings, local_port: u16) -> Command {
        let mut cmd = Command::new(&ssh.binary);
        cmd.arg("-N")
            .args(["-o", "ExitOnForwardFailure=yes"])
            .args(["-o", "BatchMode=yes"])
            .arg("-o")
            .arg(format!(
                "StrictHostKeyChecking={}",
                ssh.strict_host_key_checking
            ))
            .arg("-o")
            .arg(format!("ServerAliveInterval={}", SERVER_ALIVE_INTERVAL_SECS))
            .arg("-i")
            .arg(&ssh.key_path)
            .arg("-p")
            .arg(ssh.port.to_string())
            .arg("-L")
            .arg(format!(
                "127.0.0.1:{}:{}:{}",
                local_port, ssh.remote_host, ssh.remote_port
            ))
            .arg(format!("{}@{}", ssh.user, ssh.host));

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl TunnelLauncher for SshLauncher {
    fn launch(&self, ssh: &SshSettings, local_port: u16) -> std::io::Result<Child> {
        Self::command(ssh, local_port).spawn()
    }
}
