//! Control-mode subprocess spawning

use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::error::{BridgeError, BridgeResult};

/// Byte streams of a freshly spawned control-mode client.
pub struct ControlProcess {
    /// Notification stream (subprocess stdout)
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Command stream (subprocess stdin)
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// OS process handle, absent for in-memory transports
    pub child: Option<Child>,
}

impl std::fmt::Debug for ControlProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlProcess")
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .finish()
    }
}

/// Starts a control-mode attach for a multiplexer session.
pub trait ControlSpawner: Send + Sync {
    fn spawn(&self, session_name: &str) -> BridgeResult<ControlProcess>;
}

/// Spawns `tmux -C attach-session -t <name>` in its own process group.
#[derive(Debug, Clone)]
pub struct TmuxSpawner {
    binary: String,
}

impl TmuxSpawner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for TmuxSpawner {
    fn default() -> Self {
        Self::new("tmux")
    }
}

impl ControlSpawner for TmuxSpawner {
    fn spawn(&self, session_name: &str) -> BridgeResult<ControlProcess> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-C", "attach-session", "-t", session_name])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // New group so teardown also reaps any helper spawned underneath
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| BridgeError::Spawn(format!("{}: {}", self.binary, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Spawn("subprocess stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Spawn("subprocess stdout unavailable".to_string()))?;

        log::info!(
            "Spawned control client for session '{}' (pid {:?})",
            session_name,
            child.id()
        );

        Ok(ControlProcess {
            stdout: Box::new(stdout),
            stdin: Box::new(stdin),
            child: Some(child),
        })
    }
}

/// Signal the child's process group, falling back to a direct kill.
pub(crate) fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // The child leads its own group, so its pid is the group id.
            let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGTERM) };
            if rc == 0 {
                return;
            }
            log::debug!(
                "killpg({}) failed: {}, falling back to direct kill",
                pid,
                std::io::Error::last_os_error()
            );
        }
    }

    if let Err(e) = child.start_kill() {
        log::debug!("Failed to kill control client: {}", e);
    }
}
