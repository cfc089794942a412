//! Human-readable rendering of a [`RunReport`].

use std::fmt::Write;

use crate::types::{RunReport, TestStatus};

pub const HEADER: &str = "Running test cases...";
pub const SUCCESS_TRAILER: &str = "🎉 All test cases passed!";
pub const FAILURE_TRAILER: &str = "⚠️ Some test cases failed. Check your solution.";
pub const FATAL_PREFIX: &str = "Error executing code:";

/// Render `report` as the transcript shown to the learner.
///
/// A fatal report replaces the whole transcript with the fatal error.
pub fn render(report: &RunReport) -> String {
    if let Some(message) = &report.fatal_error {
        return format!("{FATAL_PREFIX}\n{message}");
    }

    let mut out = format!("{HEADER}\n\n");
    for outcome in &report.outcomes {
        let mark = if outcome.status == TestStatus::Passed { '✓' } else { '✗' };
        let _ = writeln!(out, "{mark} Test Case {}: {}", outcome.index, outcome.status.as_str());
        let _ = writeln!(out, "  Input: {}", outcome.input);
        match outcome.status {
            TestStatus::Error => {
                let _ = writeln!(
                    out,
                    "  Error: {}",
                    outcome.error_message.as_deref().unwrap_or_default()
                );
            }
            TestStatus::Passed | TestStatus::Failed => {
                let _ = writeln!(out, "  Expected: {}", outcome.expected);
                let _ = writeln!(out, "  Got: {}", outcome.actual.as_deref().unwrap_or_default());
            }
        }
        out.push('\n');
    }
    out.push_str(if report.all_passed {
        SUCCESS_TRAILER
    } else {
        FAILURE_TRAILER
    });
    out
}
