//! Framework summary-line detection.
//!
//! Best-effort adapters for the summary formats of common watch-mode
//! runners. Unknown frameworks fall through to a bare `FAIL` line match,
//! and a failure count of zero reads as a passing summary
//! (`Test Suites: 0 failed, 3 passed`).

use regex::Regex;
use std::sync::LazyLock;

/// Test framework whose summary format matched a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framework {
    Jest,
    Vitest,
    Mocha,
    /// A bare `FAIL` line with no recognizable framework summary.
    Generic,
}

/// Outcome read from a single summary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSummary {
    Pass,
    Fail { failed: u32, framework: Framework },
}

/// Classify one line of runner output. Returns `None` for anything that is
/// not a summary line.
pub fn classify_line(line: &str) -> Option<LineSummary> {
    if is_pass_summary(line) {
        return Some(LineSummary::Pass);
    }
    if let Some((failed, framework)) = match_failure(line) {
        if failed == 0 {
            return Some(LineSummary::Pass);
        }
        return Some(LineSummary::Fail { failed, framework });
    }
    None
}

fn match_failure(line: &str) -> Option<(u32, Framework)> {
    // Jest: "Test Suites: 1 failed, 2 passed, 3 total"
    static JEST: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)Test Suites:\s*(\d+)\s*failed\b").unwrap());
    // Vitest: "Test Files  1 failed (2)"
    static VITEST: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)Test Files\s+(\d+)\s+failed\b").unwrap());
    // Mocha: "  1 failing"
    static MOCHA: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^\s*(\d+)\s+failing\b").unwrap());
    // Anything else that prints FAIL at the start of a line.
    static BARE_FAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*FAIL\b").unwrap());

    for (re, framework) in [
        (&JEST, Framework::Jest),
        (&VITEST, Framework::Vitest),
        (&MOCHA, Framework::Mocha),
    ] {
        if let Some(caps) = re.captures(line) {
            let failed = caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(1);
            return Some((failed, framework));
        }
    }
    if BARE_FAIL.is_match(line) {
        return Some((1, Framework::Generic));
    }
    None
}

fn is_pass_summary(line: &str) -> bool {
    // Jest: "Test Suites: 58 passed, 58 total" — no "failed" anywhere
    static SUITES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)Test Suites:").unwrap());
    // Vitest: "Test Files  2 passed (2)"
    static FILES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)Test Files\b").unwrap());
    static FAILED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bfailed\b").unwrap());
    // Mocha: "  0 failing"
    static ZERO_FAILING: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^\s*0\s+failing\b").unwrap());
    // Watch mode with no matching tests
    static NO_TESTS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)No tests found\b").unwrap());

    if (SUITES.is_match(line) || FILES.is_match(line)) && !FAILED.is_match(line) {
        return true;
    }
    ZERO_FAILING.is_match(line) || NO_TESTS.is_match(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_jest_failure_with_count() {
        assert_eq!(
            classify_line("Test Suites: 3 failed, 2 passed, 5 total"),
            Some(LineSummary::Fail {
                failed: 3,
                framework: Framework::Jest
            })
        );
    }

    #[test]
    fn detects_vitest_failure() {
        assert_eq!(
            classify_line(" Test Files  1 failed (2)"),
            Some(LineSummary::Fail {
                failed: 1,
                framework: Framework::Vitest
            })
        );
    }

    #[test]
    fn detects_mocha_failing_line() {
        assert_eq!(
            classify_line("  4 failing"),
            Some(LineSummary::Fail {
                failed: 4,
                framework: Framework::Mocha
            })
        );
    }

    #[test]
    fn bare_fail_is_case_sensitive() {
        assert_eq!(
            classify_line("FAIL src/app.test.ts"),
            Some(LineSummary::Fail {
                failed: 1,
                framework: Framework::Generic
            })
        );
        assert_eq!(
            classify_line("  FAIL (2 of 7)"),
            Some(LineSummary::Fail {
                failed: 1,
                framework: Framework::Generic
            })
        );
        // Mixed case is not a runner verdict line.
        assert_eq!(classify_line("Fail: could not connect"), None);
        // "FAILED" does not match the bare-FAIL word boundary.
        assert_eq!(classify_line("FAILURE in module"), None);
    }

    #[test]
    fn detects_pass_summaries() {
        assert_eq!(
            classify_line("Test Suites: 58 passed, 58 total"),
            Some(LineSummary::Pass)
        );
        assert_eq!(
            classify_line(" Test Files  2 passed (2)"),
            Some(LineSummary::Pass)
        );
        assert_eq!(classify_line("  0 failing"), Some(LineSummary::Pass));
        assert_eq!(
            classify_line("No tests found related to files changed"),
            Some(LineSummary::Pass)
        );
    }

    #[test]
    fn zero_failed_count_reads_as_pass() {
        assert_eq!(
            classify_line("Test Suites: 0 failed, 3 passed, 3 total"),
            Some(LineSummary::Pass)
        );
        assert_eq!(
            classify_line("Test Files  0 failed (3)"),
            Some(LineSummary::Pass)
        );
    }

    #[test]
    fn summary_with_failures_is_not_pass() {
        assert!(matches!(
            classify_line("Test Suites: 1 failed, 4 passed, 5 total"),
            Some(LineSummary::Fail { failed: 1, .. })
        ));
    }

    #[test]
    fn ordinary_output_is_not_a_summary() {
        assert_eq!(classify_line("  ✓ renders the header (12 ms)"), None);
        assert_eq!(classify_line("Tests: 5 passed, 5 total"), None);
        assert_eq!(classify_line("webpack compiled successfully"), None);
        assert_eq!(classify_line(""), None);
    }
}
