//! Launchers that stand in for ssh in unit tests.

use super::TunnelLauncher;
use crate::config::SshSettings;
use std::net::TcpListener;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::{Child, Command};

/// Runs a shell script instead of ssh.
///
/// A forwarding launcher also binds the requested local port, as ssh does
/// once the forward is up. Those listeners never accept and stay bound for
/// the launcher's lifetime.
pub(crate) struct ScriptLauncher {
    script: &'static str,
    forward: bool,
    bound: Mutex<Vec<TcpListener>>,
}

impl ScriptLauncher {
    /// Run `script` without binding anything.
    pub(crate) fn new(script: &'static str) -> Self {
        Self {
            script,
            forward: false,
            bound: Mutex::new(Vec::new()),
        }
    }

    /// Bind the local port, then run `script`.
    pub(crate) fn forwarding(script: &'static str) -> Self {
        Self {
            forward: true,
            ..Self::new(script)
        }
    }
}

impl TunnelLauncher for ScriptLauncher {
    fn launch(&self, _ssh: &SshSettings, local_port: u16) -> std::io::Result<Child> {
        if self.forward {
            let listener = TcpListener::bind(("127.0.0.1", local_port))?;
            self.bound.lock().unwrap().push(listener);
        }
        Command::new("sh")
            .arg("-c")
            .arg(self.script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

/// Send SIGKILL to a process.
pub(crate) fn kill(pid: u32) {
    std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
}
