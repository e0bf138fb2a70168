//! Reporting adapters: tool-result appends, status notifications, and the
//! debug heartbeat.
//!
//! All three key off the status id. Tool-result appends and notifications
//! deduplicate independently, so enabling notifications mid-session does
//! not suppress the next report.

use std::time::{Duration, Instant};

use tracing::debug;

use azdo_core::text::{first_line, truncate_tail};

use crate::status::{sha1_hex, status_label};
use crate::{ReportMode, TestStatus, WatchContext, WatchState};

const REPORT_MAX_LINES: usize = 120;
const REPORT_MAX_BYTES: usize = 10 * 1024;
const NOTIFY_MAX_LINES: usize = 200;
const NOTIFY_MAX_BYTES: usize = 14 * 1024;
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(750);

/// Receives status-change notifications. The server forwards them to the
/// MCP client as log messages.
#[cfg_attr(test, mockall::automock)]
pub trait StatusSink: Send + Sync {
    fn notify(&self, status_id: &str, text: &str);
}

impl WatchContext {
    /// Extra text content for a tool result. `None` when reporting is off,
    /// nothing is failing, or the status was already reported in `changed`
    /// mode. A passing status still marks the report as delivered.
    pub async fn tool_result_append(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        if !state.enabled || state.report == ReportMode::Off {
            return None;
        }
        let status = state.last_status.clone()?;
        let id = status.id();
        if state.report == ReportMode::Changed
            && state.last_reported_status_id.as_deref() == Some(id.as_str())
        {
            return None;
        }
        state.last_reported_status_id = Some(id);

        // Pass states are only surfaced through notifications.
        if !status.is_fail() {
            return None;
        }
        let failure = state.last_failure_text.clone()?;
        let when = format_age(state.updated_at);
        let excerpt = truncate_tail(&failure, REPORT_MAX_LINES, REPORT_MAX_BYTES);
        Some(format!(
            "\n\n[Background tests failing (watch mode). Last update: {when}]\n{}",
            excerpt.content
        ))
    }

    /// Spawn the heartbeat task: every 750ms render the status widget and
    /// log it at debug level when its hash changed.
    pub fn spawn_heartbeat(&self) -> tokio::task::JoinHandle<()> {
        let ctx = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tick.tick().await;
                let mut state = ctx.state.lock().await;
                if !state.enabled || !state.debug {
                    // Render from scratch when the widget comes back.
                    state.last_render_hash = None;
                    continue;
                }
                let lines = render_status_lines(&state);
                let hash = sha1_hex(&lines.join("\n"));
                if state.last_render_hash.as_deref() != Some(hash.as_str()) {
                    state.last_render_hash = Some(hash);
                    debug!("{}", lines.join(" | "));
                }
            }
        })
    }
}

/// Build the notification text for a status change. Records the status id
/// even when no text is produced, so a missing excerpt is not retried.
pub(crate) fn notification_for_change(state: &mut WatchState, status_id: &str) -> Option<String> {
    if state.last_notified_status_id.as_deref() == Some(status_id) {
        return None;
    }
    state.last_notified_status_id = Some(status_id.to_string());

    let (header, body) = match &state.last_status {
        Some(TestStatus::Pass) => (
            "Background tests are PASSING (watch mode)",
            state
                .last_pass_text
                .as_deref()
                .unwrap_or("PASS")
                .trim()
                .to_string(),
        ),
        Some(TestStatus::Fail { .. }) => {
            let failure = state.last_failure_text.as_deref()?;
            let excerpt = truncate_tail(failure, NOTIFY_MAX_LINES, NOTIFY_MAX_BYTES);
            (
                "Background tests are FAILING (watch mode)",
                excerpt.content.trim().to_string(),
            )
        }
        None => return None,
    };

    let when = format_age(state.updated_at);
    let cwd = state
        .cwd
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(unknown)".to_string());
    Some(format!(
        "{header}\ncmd: {}\ncwd: {cwd}\nlast update: {when}\n\n{body}",
        state.effective_command()
    ))
}

/// Compact status widget, one string per line.
pub(crate) fn render_status_lines(state: &WatchState) -> Vec<String> {
    let running = if state.proc.is_some() {
        "running"
    } else if state.starting {
        "starting"
    } else {
        "stopped"
    };
    let status = status_label(state.last_status.as_ref());

    let mut lines = vec![
        format!("test-watch: {status} ({running})"),
        format!(
            "enabled: {} | debug: {} | notify: {}",
            state.enabled, state.debug, state.notify
        ),
        format!(
            "cmd: {}{}",
            state.effective_command(),
            if state.command_override.is_some() {
                " (override)"
            } else {
                ""
            }
        ),
        format!("last update: {}", format_age(state.updated_at)),
    ];

    match (&state.last_status, &state.last_failure_text, &state.last_pass_text) {
        (Some(TestStatus::Fail { .. }), Some(failure), _) => {
            lines.push(format!("failure: {}", first_line(failure, 140)));
        }
        (Some(TestStatus::Pass), _, Some(pass)) => {
            lines.push(format!("summary: {}", first_line(pass, 140)));
        }
        _ => {}
    }
    lines
}

/// Age of the last status update, humanized.
pub(crate) fn format_age(updated: Option<Instant>) -> String {
    let Some(updated) = updated else {
        return "unknown".to_string();
    };
    let secs = updated.elapsed().as_secs();
    if secs < 60 {
        format!("{secs}s ago")
    } else {
        format!("{}m {}s ago", secs / 60, secs % 60)
    }
}
