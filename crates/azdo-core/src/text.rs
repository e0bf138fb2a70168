//! Text truncation and matching helpers shared by the REST client and the
//! test-watch subsystem.
//!
//! Truncation here always keeps the *tail* of the input: test runners and
//! pipeline logs print their verdict last, so when output must be bounded the
//! end is the part worth keeping.

use regex::Regex;

use crate::error::{Error, Result};

/// Result of a tail truncation, carrying enough metadata for callers that
/// want to surface "N lines hidden" style hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailTruncation {
    /// The kept tail of the input.
    pub content: String,
    /// Whether anything was dropped.
    pub truncated: bool,
    /// Line count of the original input.
    pub total_lines: usize,
    /// Line count of `content`.
    pub kept_lines: usize,
}

/// Keep at most the last `max_lines` lines of `input`, further trimmed from
/// the front until the result fits in `max_bytes`.
///
/// A single line larger than the byte budget is cut from its front on a char
/// boundary so the newest output survives.
pub fn truncate_tail(input: &str, max_lines: usize, max_bytes: usize) -> TailTruncation {
    let all: Vec<&str> = input.lines().collect();
    let total_lines = all.len();

    let start = total_lines.saturating_sub(max_lines);
    let mut kept: &[&str] = &all[start..];

    // Drop oldest lines until the joined text fits the byte budget.
    let mut size: usize = kept.iter().map(|l| l.len() + 1).sum();
    size = size.saturating_sub(1);
    while kept.len() > 1 && size > max_bytes {
        size -= kept[0].len() + 1;
        kept = &kept[1..];
    }

    let kept_lines = kept.len();
    let mut content = kept.join("\n");
    let mut byte_cut = false;
    if content.len() > max_bytes {
        let mut cut = content.len() - max_bytes;
        while cut < content.len() && !content.is_char_boundary(cut) {
            cut += 1;
        }
        content = content.split_off(cut);
        byte_cut = true;
    }

    TailTruncation {
        truncated: byte_cut || kept_lines < total_lines,
        content,
        total_lines,
        kept_lines,
    }
}

/// First line of `text`, clamped to `max_chars` characters with an ellipsis.
pub fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let head: String = line.chars().take(max_chars).collect();
    format!("{head}…")
}

/// Compile a shell-style wildcard pattern (`*` and `?`) into an anchored,
/// case-insensitive regex. Used to filter repository names and file paths.
pub fn wildcard_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push_str("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            _ => expr.push_str(&regex::escape(&ch.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr)
        .map_err(|e| Error::Validation(format!("invalid wildcard pattern '{pattern}': {e}")))
}

// ============================================================================
// Tests
// ============================================================================
