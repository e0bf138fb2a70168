//! Output normalization for the test watcher.
//!
//! Watch-mode runners emit ANSI-colored output with carriage-return progress
//! updates. Normalization strips color codes, folds `\r\n` and bare `\r`
//! into newlines, and keeps a bounded window of recent non-empty lines.

use regex::Regex;

/// Most recent lines kept for summary detection.
pub(crate) const MAX_BUFFER_LINES: usize = 5000;

/// Remove ANSI SGR color sequences.
pub fn strip_ansi(input: &str) -> String {
    static ANSI_RE: std::sync::LazyLock<Regex> =
        std::sync::LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());
    ANSI_RE.replace_all(input, "").to_string()
}

/// Rolling buffer of recent, normalized output lines.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    lines: Vec<String>,
}

impl OutputBuffer {
    /// Append one raw chunk of subprocess output.
    ///
    /// Empty lines are dropped. Whitespace-only lines are kept so excerpts
    /// match what the runner printed.
    pub fn append_chunk(&mut self, chunk: &str) {
        let text = strip_ansi(chunk);
        for line in text.split(['\n', '\r']) {
            if line.is_empty() {
                continue;
            }
            self.lines.push(line.to_string());
        }
        if self.lines.len() > MAX_BUFFER_LINES {
            let excess = self.lines.len() - MAX_BUFFER_LINES;
            self.lines.drain(..excess);
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
