//! Tunneling engine process management.
//!
//! Wraps one `<binary> run -c <config>` child process and owns its
//! lifetime: created on spawn, terminated on probe teardown, supervisor
//! shutdown, or drop. Probe instances capture stderr into a bounded
//! buffer for diagnostics; the tunnel instance inherits our stdio.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

/// Cap on buffered engine stderr kept for diagnostics.
const STDERR_CAPTURE_LIMIT: usize = 16 * 1024;

/// How long to wait for the engine to exit after a termination request
/// before falling back to a hard kill.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// Handle to a running engine process.
pub struct EngineProcess {
    child: Child,
    pid: Option<u32>,
    elevated: bool,
    stderr_capture: Option<JoinHandle<String>>,
}

impl EngineProcess {
    /// Spawn a probe-mode engine instance.
    ///
    /// Stdout is discarded; stderr is drained into a bounded buffer that
    /// [`EngineProcess::terminate`] returns as the diagnostic text.
    /// Probe instances never run elevated.
    pub fn spawn_probe(binary: &Path, config_path: &Path) -> Result<Self> {
        let mut cmd = engine_command(binary, config_path, false);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn engine binary: {}", binary.display()))?;
        let stderr_capture = child.stderr.take().map(|s| tokio::spawn(drain_stderr(s)));
        let pid = child.id();

        Ok(Self {
            child,
            pid,
            elevated: false,
            stderr_capture,
        })
    }

    /// Spawn the long-running tunnel instance with stdio attached to ours.
    ///
    /// With `elevate`, the engine runs under sudo so it can create the TUN
    /// interface.
    pub fn spawn_tunnel(binary: &Path, config_path: &Path, elevate: bool) -> Result<Self> {
        let mut cmd = engine_command(binary, config_path, elevate);
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn engine binary: {}", binary.display()))?;
        let pid = child.id();

        Ok(Self {
            child,
            pid,
            elevated: elevate,
            stderr_capture: None,
        })
    }

    /// OS process id, when the process is still attached.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }

    /// Wait for the engine to exit on its own.
    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    /// Kill a probe instance and return its buffered stderr.
    ///
    /// Consumes the handle: after this the process is gone on every path.
    pub async fn terminate(mut self) -> String {
        self.child.kill().await.ok();
        let _ = tokio::time::timeout(SHUTDOWN_WAIT, self.child.wait()).await;
        match self.stderr_capture.take() {
            Some(capture) => capture.await.unwrap_or_default(),
            None => String::new(),
        }
    }

    /// Gracefully stop the tunnel instance: termination request, bounded
    /// wait, hard kill as a last resort.
    pub async fn shutdown(&mut self) {
        self.request_termination().await;
        if tokio::time::timeout(SHUTDOWN_WAIT, self.child.wait())
            .await
            .is_err()
        {
            self.child.kill().await.ok();
            let _ = self.child.wait().await;
        }
    }

    async fn request_termination(&mut self) {
        let Some(pid) = self.pid else {
            let _ = self.child.start_kill();
            return;
        };
        if self.elevated {
            // The engine runs as root; a signal from this process would be
            // refused. sudo relays the signal to the command it spawned.
            let _ = Command::new("sudo")
                .arg("kill")
                .arg(pid.to_string())
                .status()
                .await;
        } else {
            #[cfg(unix)]
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            #[cfg(not(unix))]
            {
                let _ = self.child.start_kill();
            }
        }
    }
}

fn engine_command(binary: &Path, config_path: &Path, elevate: bool) -> Command {
    let mut cmd = if elevate {
        let mut c = Command::new("sudo");
        c.arg(binary);
        c
    } else {
        Command::new(binary)
    };
    cmd.arg("run").arg("-c").arg(config_path);
    cmd
}

/// Drain the child's stderr until EOF, keeping at most
/// [`STDERR_CAPTURE_LIMIT`] bytes. Draining past the cap keeps the child
/// from blocking on a full pipe.
async fn drain_stderr(mut stream: ChildStderr) -> String {
    let mut buffered = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if buffered.len() < STDERR_CAPTURE_LIMIT {
                    let take = n.min(STDERR_CAPTURE_LIMIT - buffered.len());
                    buffered.extend_from_slice(&chunk[..take]);
                }
            }
        }
    }
    String::from_utf8_lossy(&buffered).trim().to_string()
}
