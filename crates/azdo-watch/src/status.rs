//! Status reduction: turn the output window into a PASS/FAIL verdict.
//!
//! The newest summary line wins — watch runners reprint their summary after
//! every change, so scanning backward from the tail finds the current run.
//! Failure signatures hash only the assertion-relevant lines, keeping
//! volatile data such as timings out, so an unchanged failure keeps its
//! identity across reruns.

use std::sync::LazyLock;

use regex::Regex;
use sha1::{Digest, Sha1};
use tracing::debug;

use azdo_core::text::truncate_tail;

use crate::detect::{classify_line, LineSummary};

/// Lines scanned backward for a summary verdict.
const SCAN_WINDOW: usize = 200;
/// Tail window hashed for the failure signature.
const SIGNATURE_WINDOW: usize = 250;
/// Raw lines hashed when no signature-relevant line survives the filter.
const SIGNATURE_FALLBACK_LINES: usize = 30;
/// Tail window captured as the failure excerpt / pass summary source.
const EXCERPT_WINDOW: usize = 120;
const PASS_SUMMARY_MAX_LINES: usize = 20;
const PASS_SUMMARY_MAX_BYTES: usize = 4 * 1024;
const FAILURE_MAX_LINES: usize = 200;
const FAILURE_MAX_BYTES: usize = 12 * 1024;

/// Shown when a failure is detected but no output survived truncation.
const NO_OUTPUT_PLACEHOLDER: &str = "(tests failing, but no output captured)";

/// Timing lines are volatile between reruns and never summary-relevant.
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^Time:\b").unwrap());

/// Detected test status. The id format (`pass` / `fail:<sha1>`) is stable
/// and drives change detection and report deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    Fail { signature: String },
}

impl TestStatus {
    pub fn id(&self) -> String {
        match self {
            TestStatus::Pass => "pass".to_string(),
            TestStatus::Fail { signature } => format!("fail:{signature}"),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TestStatus::Pass => "PASS",
            TestStatus::Fail { .. } => "FAIL",
        }
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, TestStatus::Fail { .. })
    }
}

/// Label for an optional status; `None` renders as `UNKNOWN`.
pub fn status_label(status: Option<&TestStatus>) -> &'static str {
    status.map_or("UNKNOWN", TestStatus::label)
}

/// A verdict read from the output window, with its report text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verdict {
    Pass {
        summary: String,
    },
    Fail {
        signature: String,
        failure_text: String,
    },
}

/// Scan the output window backward for the newest summary line and build a
/// verdict. `None` when no summary is visible (partial output mid-run).
pub(crate) fn evaluate_window(lines: &[String]) -> Option<Verdict> {
    let scan = lines.len().min(SCAN_WINDOW);
    for i in 0..scan {
        let line = &lines[lines.len() - 1 - i];
        match classify_line(line) {
            Some(LineSummary::Pass) => {
                return Some(Verdict::Pass {
                    summary: extract_pass_summary(lines),
                });
            }
            Some(LineSummary::Fail { failed, framework }) => {
                debug!(failed, ?framework, "failure summary detected");
                let tail = lines[lines.len().saturating_sub(EXCERPT_WINDOW)..].join("\n");
                let text = truncate_tail(&tail, FAILURE_MAX_LINES, FAILURE_MAX_BYTES)
                    .content
                    .trim()
                    .to_string();
                let failure_text = if text.is_empty() {
                    NO_OUTPUT_PLACEHOLDER.to_string()
                } else {
                    text
                };
                return Some(Verdict::Fail {
                    signature: failure_signature(lines),
                    failure_text,
                });
            }
            None => {}
        }
    }
    None
}

/// Summary-relevant tail lines of a passing run, bounded.
fn extract_pass_summary(lines: &[String]) -> String {
    static KEEP: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)^(?:Test Suites:|Tests:|Snapshots:|Ran all test suites|No tests found|Test Files\b|\d+\s+passing\b|\d+\s+failing\b)",
        )
        .unwrap()
    });

    let tail = &lines[lines.len().saturating_sub(EXCERPT_WINDOW)..];
    let interesting: Vec<&str> = tail
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .filter(|l| !TIME_RE.is_match(l) && KEEP.is_match(l))
        .collect();

    let text = if interesting.is_empty() {
        tail.last().map(String::as_str).unwrap_or("PASS").to_string()
    } else {
        interesting.join("\n")
    };
    truncate_tail(&text, PASS_SUMMARY_MAX_LINES, PASS_SUMMARY_MAX_BYTES)
        .content
        .trim()
        .to_string()
}

/// Hash of the failure-relevant tail lines. Falls back to the raw last
/// lines when nothing matches, so prefixed or wrapped summaries still get
/// a stable-enough identity.
fn failure_signature(lines: &[String]) -> String {
    static KEEP: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"^(?:FAIL\b|●\s+|(?i:Test Suites:|Tests:|Snapshots:|Test Files\b|\d+\s+failing\b))",
        )
        .unwrap()
    });

    let tail = &lines[lines.len().saturating_sub(SIGNATURE_WINDOW)..];
    let interesting: Vec<&str> = tail
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .filter(|l| !TIME_RE.is_match(l) && KEEP.is_match(l))
        .collect();

    let text = if interesting.is_empty() {
        tail[tail.len().saturating_sub(SIGNATURE_FALLBACK_LINES)..].join("\n")
    } else {
        interesting.join("\n")
    };
    sha1_hex(&text)
}

/// Hex SHA-1 of `text`.
pub(crate) fn sha1_hex(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_lines(block: &str) -> Vec<String> {
        block.lines().map(str::to_string).collect()
    }

    const JEST_FAILING: &str = "\
FAIL src/app.test.ts
  ● renders the header

    expect(received).toBe(expected)

    Expected: \"Widgets\"
    Received: \"widgets\"

Test Suites: 1 failed, 4 passed, 5 total
Tests:       1 failed, 24 passed, 25 total
Snapshots:   0 total
Time:        2.53 s
Ran all test suites.";

    #[test]
    fn failing_run_produces_signature_and_text() {
        let verdict = evaluate_window(&to_lines(JEST_FAILING)).unwrap();
        let Verdict::Fail {
            signature,
            failure_text,
        } = verdict
        else {
            panic!("expected a failing verdict");
        };
        assert_eq!(signature.len(), 40);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(failure_text.contains("● renders the header"));
        assert!(failure_text.contains("Test Suites: 1 failed"));
    }

    #[test]
    fn signature_ignores_timing_lines() {
        let fast = to_lines(JEST_FAILING);
        let slow: Vec<String> = fast
            .iter()
            .map(|l| {
                if l.starts_with("Time:") {
                    "Time:        9.99 s".to_string()
                } else {
                    l.clone()
                }
            })
            .collect();

        let sig = |lines: &[String]| match evaluate_window(lines).unwrap() {
            Verdict::Fail { signature, .. } => signature,
            other => panic!("expected fail, got {other:?}"),
        };
        assert_eq!(sig(&fast), sig(&slow));
    }

    #[test]
    fn different_failures_hash_differently() {
        let a = to_lines(JEST_FAILING);
        let b = to_lines(&JEST_FAILING.replace("renders the header", "renders the footer"));
        let sig = |lines: &[String]| match evaluate_window(lines).unwrap() {
            Verdict::Fail { signature, .. } => signature,
            other => panic!("expected fail, got {other:?}"),
        };
        assert_ne!(sig(&a), sig(&b));
    }

    #[test]
    fn newest_summary_wins() {
        let mut lines = to_lines(JEST_FAILING);
        lines.extend(to_lines(
            "Test Suites: 5 passed, 5 total\nTests:       25 passed, 25 total\nRan all test suites.",
        ));
        let verdict = evaluate_window(&lines).unwrap();
        assert!(matches!(verdict, Verdict::Pass { .. }));
    }

    #[test]
    fn pass_summary_keeps_counts_drops_timing() {
        let lines = to_lines(
            "PASS src/app.test.ts\n\
             Test Suites: 5 passed, 5 total\n\
             Tests:       25 passed, 25 total\n\
             Snapshots:   0 total\n\
             Time:        2.1 s\n\
             Ran all test suites.",
        );
        let Verdict::Pass { summary } = evaluate_window(&lines).unwrap() else {
            panic!("expected a passing verdict");
        };
        assert!(summary.contains("Test Suites: 5 passed, 5 total"));
        assert!(summary.contains("Ran all test suites."));
        assert!(!summary.contains("Time:"));
    }

    #[test]
    fn zero_failed_summary_is_a_pass() {
        let verdict = evaluate_window(&to_lines("Test Suites: 0 failed, 1 total")).unwrap();
        assert!(matches!(verdict, Verdict::Pass { .. }));
    }

    #[test]
    fn no_summary_in_window_is_none() {
        let lines = to_lines("compiling...\nwaiting for file changes");
        assert_eq!(evaluate_window(&lines), None);
        assert_eq!(evaluate_window(&[]), None);
    }

    #[test]
    fn summary_outside_scan_window_is_ignored() {
        let mut lines = to_lines(JEST_FAILING);
        for i in 0..SCAN_WINDOW {
            lines.push(format!("console.log noise {i}"));
        }
        assert_eq!(evaluate_window(&lines), None);
    }

    #[test]
    fn signature_falls_back_to_raw_tail() {
        // A prefixed summary matches the detector (substring) but not the
        // anchored keep filter, so the signature hashes the raw tail.
        let lines = to_lines("> Test Suites: 1 failed, 1 total");
        let Verdict::Fail { signature, .. } = evaluate_window(&lines).unwrap() else {
            panic!("expected a failing verdict");
        };
        assert_eq!(signature, sha1_hex("> Test Suites: 1 failed, 1 total"));
    }

    #[test]
    fn mocha_pass_summary_keeps_passing_line() {
        let lines = to_lines("  12 passing (340ms)\n  0 failing");
        let Verdict::Pass { summary } = evaluate_window(&lines).unwrap() else {
            panic!("expected a passing verdict");
        };
        assert!(summary.contains("12 passing"));
        assert!(summary.contains("0 failing"));
    }

    #[test]
    fn status_ids_and_labels() {
        assert_eq!(TestStatus::Pass.id(), "pass");
        assert_eq!(TestStatus::Pass.label(), "PASS");
        let fail = TestStatus::Fail {
            signature: "abc123".to_string(),
        };
        assert_eq!(fail.id(), "fail:abc123");
        assert_eq!(fail.label(), "FAIL");
        assert!(fail.is_fail());
        assert!(!TestStatus::Pass.is_fail());
        assert_eq!(status_label(None), "UNKNOWN");
        assert_eq!(status_label(Some(&TestStatus::Pass)), "PASS");
    }

    #[test]
    fn sha1_hex_is_stable() {
        assert_eq!(sha1_hex(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(sha1_hex("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }
}
