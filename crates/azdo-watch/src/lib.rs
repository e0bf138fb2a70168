//! Background test watcher.
//!
//! Runs a long-lived test command (watch mode) in a subprocess, parses its
//! output for framework summary lines, and tracks a PASS/FAIL status with a
//! stable failure signature. Status changes are edge-triggered into the
//! reporting adapters: tool-result appends, notification messages, and a
//! debug heartbeat.
//!
//! All state lives in a [`WatchContext`] built from a [`WatchConfig`]; there
//! is no process-global registry. The context is cheap to clone and is
//! shared between the supervisor, the output readers, and the MCP server.

pub mod detect;
pub mod normalize;
pub mod report;
pub mod status;
pub mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use normalize::OutputBuffer;
pub use report::StatusSink;
pub use status::{status_label, TestStatus};

/// Default watch command; assumes an npm script named `test:watch`.
pub const DEFAULT_WATCH_COMMAND: &str = "npm run -s test:watch";

/// When to append watcher status to tool results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// Append only when the status id changed since the last report.
    Changed,
    /// Append after every tool call while tests are failing.
    Always,
    /// Never append.
    Off,
}

impl Default for ReportMode {
    fn default() -> Self {
        ReportMode::Changed
    }
}

impl std::str::FromStr for ReportMode {
    type Err = azdo_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "changed" => Ok(ReportMode::Changed),
            "always" => Ok(ReportMode::Always),
            "off" => Ok(ReportMode::Off),
            other => Err(azdo_core::Error::Validation(format!(
                "Invalid report mode '{other}' (expected changed, always, or off)"
            ))),
        }
    }
}

impl std::fmt::Display for ReportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ReportMode::Changed => "changed",
            ReportMode::Always => "always",
            ReportMode::Off => "off",
        })
    }
}

/// Startup configuration for the watcher.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub enabled: bool,
    pub command: String,
    /// Working directory for the subprocess; `None` inherits the server's.
    pub cwd: Option<PathBuf>,
    pub report: ReportMode,
    pub debug: bool,
    pub notify: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: DEFAULT_WATCH_COMMAND.to_string(),
            cwd: None,
            report: ReportMode::Changed,
            debug: false,
            notify: false,
        }
    }
}

/// Runtime reconfiguration, driven by the `test_watch_configure` tool.
/// Unset fields keep their current values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureRequest {
    /// Enable or disable the watcher (starts/stops the subprocess).
    pub enabled: Option<bool>,
    /// Override the watch command; an empty string clears the override.
    pub command: Option<String>,
    pub report: Option<ReportMode>,
    pub debug: Option<bool>,
    pub notify: Option<bool>,
    /// Clear the command override and report/notify deduplication markers.
    pub reset: Option<bool>,
}

/// Current watcher state rendered for the `test_watch_status` tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub enabled: bool,
    pub running: bool,
    pub starting: bool,
    /// `PASS`, `FAIL`, or `UNKNOWN`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
    pub command: String,
    pub command_overridden: bool,
    pub report: ReportMode,
    pub debug: bool,
    pub notify: bool,
    pub last_update: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_text: Option<String>,
}

/// Live subprocess bookkeeping. The generation ties an exit notification to
/// the spawn it belongs to, so a stale waiter never clears a newer process.
#[derive(Debug, Clone)]
pub(crate) struct ProcHandle {
    pub(crate) pid: Option<u32>,
    pub(crate) generation: u64,
}

pub(crate) struct WatchState {
    pub(crate) enabled: bool,
    pub(crate) command: String,
    pub(crate) command_override: Option<String>,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) report: ReportMode,
    pub(crate) debug: bool,
    pub(crate) notify: bool,

    pub(crate) buffer: OutputBuffer,
    pub(crate) last_status: Option<TestStatus>,
    pub(crate) last_failure_text: Option<String>,
    pub(crate) last_pass_text: Option<String>,
    pub(crate) updated_at: Option<Instant>,

    pub(crate) last_reported_status_id: Option<String>,
    pub(crate) last_notified_status_id: Option<String>,
    pub(crate) last_render_hash: Option<String>,

    pub(crate) proc: Option<ProcHandle>,
    pub(crate) starting: bool,
    pub(crate) generation: u64,

    pub(crate) sink: Option<Arc<dyn StatusSink>>,
}

impl WatchState {
    fn new(config: WatchConfig) -> Self {
        Self {
            enabled: config.enabled,
            command: config.command,
            command_override: None,
            cwd: config.cwd,
            report: config.report,
            debug: config.debug,
            notify: config.notify,
            buffer: OutputBuffer::default(),
            last_status: None,
            last_failure_text: None,
            last_pass_text: None,
            updated_at: None,
            last_reported_status_id: None,
            last_notified_status_id: None,
            last_render_hash: None,
            proc: None,
            starting: false,
            generation: 0,
            sink: None,
        }
    }

    pub(crate) fn effective_command(&self) -> &str {
        self.command_override.as_deref().unwrap_or(&self.command)
    }

    pub(crate) fn status_id(&self) -> Option<String> {
        self.last_status.as_ref().map(TestStatus::id)
    }

    pub(crate) fn apply_verdict(&mut self, verdict: status::Verdict) {
        match verdict {
            status::Verdict::Pass { summary } => {
                self.last_failure_text = None;
                self.last_pass_text = Some(summary);
                self.last_status = Some(TestStatus::Pass);
            }
            status::Verdict::Fail {
                signature,
                failure_text,
            } => {
                self.last_failure_text = Some(failure_text);
                self.last_pass_text = None;
                self.last_status = Some(TestStatus::Fail { signature });
            }
        }
        self.updated_at = Some(Instant::now());
    }
}

/// Shared handle to the watcher. Clones refer to the same state.
#[derive(Clone)]
pub struct WatchContext {
    pub(crate) state: Arc<Mutex<WatchState>>,
}

impl WatchContext {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(WatchState::new(config))),
        }
    }

    /// Install the sink that receives status-change notifications.
    pub async fn set_sink(&self, sink: Arc<dyn StatusSink>) {
        self.state.lock().await.sink = Some(sink);
    }

    /// Whether the watcher is currently enabled.
    pub async fn enabled(&self) -> bool {
        self.state.lock().await.enabled
    }

    /// Feed one chunk of subprocess output through the normalizer and
    /// reducer. Fires the status sink when the status id changes and
    /// notifications are enabled.
    pub async fn ingest_chunk(&self, chunk: &str) {
        let fired = {
            let mut state = self.state.lock().await;
            let prev = state.status_id();
            state.buffer.append_chunk(chunk);
            if let Some(verdict) = status::evaluate_window(state.buffer.lines()) {
                state.apply_verdict(verdict);
            }
            let Some(current) = state.status_id() else {
                return;
            };
            if prev.as_deref() == Some(current.as_str()) {
                return;
            }
            debug!(status = %current, "test watcher status changed");
            if !state.notify {
                return;
            }
            let text = report::notification_for_change(&mut state, &current);
            match (state.sink.clone(), text) {
                (Some(sink), Some(text)) => Some((sink, current, text)),
                _ => None,
            }
        };
        // Deliver outside the lock; sinks may log or send on channels.
        if let Some((sink, status_id, text)) = fired {
            sink.notify(&status_id, &text);
        }
    }

    /// Current state rendered for the status tool.
    pub async fn snapshot(&self) -> StatusSnapshot {
        let state = self.state.lock().await;
        StatusSnapshot {
            enabled: state.enabled,
            running: state.proc.is_some(),
            starting: state.starting,
            status: status_label(state.last_status.as_ref()).to_string(),
            status_id: state.status_id(),
            command: state.effective_command().to_string(),
            command_overridden: state.command_override.is_some(),
            report: state.report,
            debug: state.debug,
            notify: state.notify,
            last_update: report::format_age(state.updated_at),
            failure_text: state.last_failure_text.clone(),
            pass_text: state.last_pass_text.clone(),
        }
    }

    /// Apply a configuration change, restarting the subprocess when the
    /// effective command changed.
    pub async fn configure(&self, request: ConfigureRequest) -> StatusSnapshot {
        let (desired, restart) = {
            let mut state = self.state.lock().await;
            let mut restart = false;

            if request.reset.unwrap_or(false) {
                restart |= state.command_override.take().is_some();
                state.last_reported_status_id = None;
                state.last_notified_status_id = None;
            }
            if let Some(command) = &request.command {
                let trimmed = command.trim();
                let next = (!trimmed.is_empty()).then(|| trimmed.to_string());
                if next != state.command_override {
                    state.command_override = next;
                    restart = true;
                }
            }
            if let Some(report) = request.report {
                state.report = report;
            }
            if let Some(enabled) = request.debug {
                state.debug = enabled;
            }
            if let Some(enabled) = request.notify {
                state.notify = enabled;
            }
            if let Some(enabled) = request.enabled {
                state.enabled = enabled;
            }
            (request.enabled, restart)
        };

        match desired {
            Some(false) => self.stop().await,
            Some(true) => {
                if restart {
                    self.stop().await;
                }
                self.start().await;
            }
            None if restart => {
                self.stop().await;
                if self.enabled().await {
                    self.start().await;
                }
            }
            None => {}
        }
        self.snapshot().await
    }
}
