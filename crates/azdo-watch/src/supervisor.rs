//! Subprocess supervision for the watch command.
//!
//! At most one live subprocess. The command runs under the platform shell
//! with color output disabled; stdout and stderr are pumped through the
//! normalizer as chunks arrive. Exits restart the watcher after a fixed
//! delay while it stays enabled. Stop is best-effort: SIGTERM and clear the
//! handle without waiting for the process to die.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::{ProcHandle, WatchContext};

const RESTART_DELAY: Duration = Duration::from_millis(1000);

fn shell_command() -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

impl WatchContext {
    /// Start the watch subprocess. No-op when one is already live or being
    /// started, so concurrent callers cannot double-spawn.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.proc.is_some() || state.starting {
            return;
        }
        state.starting = true;
        state.generation += 1;
        let generation = state.generation;
        let command = state.effective_command().to_string();
        let cwd = state.cwd.clone();

        let (shell, shell_arg) = shell_command();
        let mut cmd = Command::new(shell);
        cmd.arg(shell_arg)
            .arg(&command)
            .env("FORCE_COLOR", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cwd {
            cmd.current_dir(dir);
        }

        match cmd.spawn() {
            Ok(mut child) => {
                let pid = child.id();
                state.proc = Some(ProcHandle { pid, generation });
                state.starting = false;
                debug!(command = %command, pid = ?pid, "test watcher started");

                if let Some(stdout) = child.stdout.take() {
                    tokio::spawn(pump_output(self.clone(), stdout));
                }
                if let Some(stderr) = child.stderr.take() {
                    tokio::spawn(pump_output(self.clone(), stderr));
                }
                tokio::spawn(wait_for_exit(self.clone(), child, generation));
            }
            Err(e) => {
                state.starting = false;
                warn!(command = %command, error = %e, "failed to start test watcher");
            }
        }
    }

    /// Send SIGTERM to the subprocess (best-effort) and clear the handle.
    /// Does not wait for the process to exit.
    pub async fn stop(&self) {
        let handle = {
            let mut state = self.state.lock().await;
            state.starting = false;
            state.proc.take()
        };
        if let Some(handle) = handle {
            if let Some(pid) = handle.pid {
                terminate(pid).await;
            }
            debug!("test watcher stopped");
        }
    }

    /// Disable the watcher and stop the subprocess. Called at server
    /// shutdown.
    pub async fn shutdown(&self) {
        self.state.lock().await.enabled = false;
        self.stop().await;
    }
}

/// Read chunks from a subprocess stream into the watcher state.
async fn pump_output<R>(ctx: WatchContext, mut stream: R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => ctx.ingest_chunk(&String::from_utf8_lossy(&buf[..n])).await,
        }
    }
}

/// Wait for the subprocess to exit, clear the handle, and schedule a
/// restart while the watcher stays enabled. The generation check makes
/// exits from stopped or replaced processes inert.
///
/// Boxed because it indirectly recurses into `start`, which spawns this
/// future again; the boxing breaks the opaque-future `Send` cycle.
fn wait_for_exit(
    ctx: WatchContext,
    mut child: Child,
    generation: u64,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        let status = child.wait().await;
        let restart = {
            let mut state = ctx.state.lock().await;
            if state.proc.as_ref().map(|p| p.generation) != Some(generation) {
                return;
            }
            state.proc = None;
            state.starting = false;
            debug!(status = ?status.ok(), "test watcher exited");
            state.enabled
        };
        if !restart {
            return;
        }
        tokio::time::sleep(RESTART_DELAY).await;
        let respawn = {
            let state = ctx.state.lock().await;
            state.enabled && state.proc.is_none() && !state.starting
        };
        if respawn {
            warn!("test watcher exited; restarting");
            ctx.start().await;
        }
    })
}

/// Deliver SIGTERM through the platform kill utility. Tokio's built-in
/// kill sends SIGKILL, which would skip the runner's cleanup handlers.
#[cfg(unix)]
async fn terminate(pid: u32) {
    let _ = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .await;
}

#[cfg(not(unix))]
async fn terminate(pid: u32) {
    let _ = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{WatchConfig, DEFAULT_WATCH_COMMAND};
    use std::time::Instant;

    fn config(command: &str) -> WatchConfig {
        WatchConfig {
            command: command.to_string(),
            ..Default::default()
        }
    }

    async fn wait_until<F>(ctx: &WatchContext, timeout: Duration, mut pred: F) -> bool
    where
        F: FnMut(&crate::StatusSnapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if pred(&ctx.snapshot().await) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn start_twice_spawns_one_process() {
        let ctx = WatchContext::new(config("sleep 5"));
        ctx.start().await;
        ctx.start().await;

        {
            let state = ctx.state.lock().await;
            assert!(state.proc.is_some());
            assert_eq!(state.generation, 1);
        }
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn captures_output_and_reduces_status() {
        let ctx = WatchContext::new(config("echo 'Test Suites: 1 failed, 1 total'"));
        ctx.start().await;

        let failed = wait_until(&ctx, Duration::from_secs(5), |s| s.status == "FAIL").await;
        assert!(failed, "watcher never observed the failing summary");
        let snap = ctx.snapshot().await;
        assert!(snap.failure_text.unwrap().contains("1 failed"));
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn restarts_after_exit_while_enabled() {
        let ctx = WatchContext::new(config("echo restart-me"));
        ctx.start().await;

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let generation = ctx.state.lock().await.generation;
            if generation >= 2 {
                break;
            }
            assert!(Instant::now() < deadline, "watcher never restarted");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn stop_clears_handle_without_restart() {
        let ctx = WatchContext::new(config("sleep 5"));
        ctx.start().await;
        assert!(ctx.snapshot().await.running);

        ctx.stop().await;
        let snap = ctx.snapshot().await;
        assert!(!snap.running);
        assert!(!snap.starting);

        // The exited process must not trigger a restart: its generation is
        // stale once the handle is cleared.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!ctx.snapshot().await.running);
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_disables_and_stops() {
        let ctx = WatchContext::new(config("sleep 5"));
        ctx.start().await;
        ctx.shutdown().await;

        let snap = ctx.snapshot().await;
        assert!(!snap.enabled);
        assert!(!snap.running);

        // Disabled watcher does not come back.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!ctx.snapshot().await.running);
    }

    #[tokio::test]
    async fn spawn_failure_is_swallowed() {
        let ctx = WatchContext::new(WatchConfig {
            command: "true".to_string(),
            cwd: Some(std::path::PathBuf::from("/nonexistent/azdo-watch-test")),
            ..Default::default()
        });
        ctx.start().await;

        let state = ctx.state.lock().await;
        assert!(state.proc.is_none());
        assert!(!state.starting);
    }

    #[tokio::test]
    async fn configure_enable_starts_and_disable_stops() {
        let ctx = WatchContext::new(WatchConfig {
            enabled: false,
            command: "sleep 5".to_string(),
            ..Default::default()
        });
        assert!(!ctx.snapshot().await.running);

        let snap = ctx
            .configure(crate::ConfigureRequest {
                enabled: Some(true),
                ..Default::default()
            })
            .await;
        assert!(snap.enabled);
        assert!(snap.running);

        let snap = ctx
            .configure(crate::ConfigureRequest {
                enabled: Some(false),
                ..Default::default()
            })
            .await;
        assert!(!snap.enabled);
        assert!(!snap.running);
    }

    #[test]
    fn default_command_is_npm_watch_script() {
        assert_eq!(DEFAULT_WATCH_COMMAND, "npm run -s test:watch");
        assert_eq!(WatchConfig::default().command, DEFAULT_WATCH_COMMAND);
    }
}
