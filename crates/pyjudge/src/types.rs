//! Foundational public types for the pyjudge library.
//!
//! This module defines the data model shared by every harness component:
//! - [`TestCase`]: one LeetCode-style input/expected-output pair
//! - [`CallTarget`]: the callable discovered in a submission
//! - [`TestOutcome`] / [`RunReport`]: the harness's output artifact
//! - [`HarnessSettings`]: run configuration (case cap, timeouts)
//! - [`ExecutionError`] / [`HarnessError`]: structured error variants

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Number of test cases executed per run unless configured otherwise.
pub const DEFAULT_MAX_TEST_CASES: usize = 3;

/// Default wall-clock limit for a single test case, and for defining the
/// submission: 5,000,000,000 ns (5 seconds).
pub const DEFAULT_TIMEOUT_NS: u64 = 5_000_000_000;

// ── Inputs ────────────────────────────────────────────────────────────────────

/// One test case from a problem definition.
///
/// `input` is a comma-joined list of literal assignments, e.g.
/// `nums = [2,7,11,15], target = 9`; `output` is the expected stringified result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

// ── Call target ───────────────────────────────────────────────────────────────

/// The callable the harness invokes for a submission.
///
/// Derived fresh from the submission's syntax tree on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CallTarget {
    /// First method of a top-level `class Solution`; called on a fresh instance.
    Method { name: String, params: Vec<String> },
    /// First top-level function.
    Function { name: String, params: Vec<String> },
    /// Neither a `Solution` method nor a top-level function exists.
    NotFound,
}

impl CallTarget {
    pub fn is_method(&self) -> bool {
        matches!(self, CallTarget::Method { .. })
    }

    /// Name of the callable, or `None` for [`CallTarget::NotFound`].
    pub fn name(&self) -> Option<&str> {
        match self {
            CallTarget::Method { name, .. } | CallTarget::Function { name, .. } => Some(name),
            CallTarget::NotFound => None,
        }
    }

    /// Declared positional parameter names in declaration order (receiver excluded).
    pub fn param_names(&self) -> &[String] {
        match self {
            CallTarget::Method { params, .. } | CallTarget::Function { params, .. } => params,
            CallTarget::NotFound => &[],
        }
    }
}

// ── Outputs ───────────────────────────────────────────────────────────────────

/// Classification of a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    /// Normalized output matched the expected output.
    Passed,
    /// The call succeeded but the normalized output differed.
    Failed,
    /// An exception or timeout occurred, or no callable was discovered.
    Error,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "PASSED",
            TestStatus::Failed => "FAILED",
            TestStatus::Error => "ERROR",
        }
    }
}

/// Result of one test case within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// 1-based position of the test case.
    pub index: usize,
    pub status: TestStatus,
    pub input: String,
    pub expected: String,
    /// Captured output, trimmed. `None` for [`TestStatus::Error`].
    pub actual: Option<String>,
    /// Diagnostic for [`TestStatus::Error`].
    pub error_message: Option<String>,
}

/// The harness's sole output artifact for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub outcomes: Vec<TestOutcome>,
    /// `true` iff no outcome is FAILED or ERROR and the run was not fatal.
    pub all_passed: bool,
    /// Set when the submission could not be defined; `outcomes` is then empty.
    pub fatal_error: Option<String>,
}

impl RunReport {
    pub(crate) fn from_outcomes(outcomes: Vec<TestOutcome>) -> Self {
        let all_passed = outcomes.iter().all(|o| o.status == TestStatus::Passed);
        Self {
            outcomes,
            all_passed,
            fatal_error: None,
        }
    }

    pub(crate) fn fatal(message: impl Into<String>) -> Self {
        Self {
            outcomes: Vec::new(),
            all_passed: false,
            fatal_error: Some(message.into()),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal_error.is_some()
    }

    /// Number of outcomes with the given status.
    pub fn count(&self, status: TestStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Configuration for a [`TestHarness`](crate::TestHarness).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessSettings {
    /// Maximum number of test cases executed per run (a prefix of the list).
    /// Default: 3.
    pub max_test_cases: usize,

    /// Wall-clock limit for one test case, in nanoseconds. Default: 5 s.
    pub case_timeout_ns: u64,

    /// Wall-clock limit for executing the submission's top-level code. Default: 5 s.
    pub define_timeout_ns: u64,

    /// Prefix the submission with `from __future__ import annotations` so type
    /// hints are never evaluated at definition time. Default: `true`.
    pub postpone_annotations: bool,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            max_test_cases: DEFAULT_MAX_TEST_CASES,
            case_timeout_ns: DEFAULT_TIMEOUT_NS,
            define_timeout_ns: DEFAULT_TIMEOUT_NS,
            postpone_annotations: true,
        }
    }
}

impl HarnessSettings {
    /// Defaults overridden by `PYJUDGE_MAX_TEST_CASES`, `PYJUDGE_CASE_TIMEOUT_MS`
    /// and `PYJUDGE_DEFINE_TIMEOUT_MS`. Values that do not parse are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        if let Some(n) = parse_var::<usize, _>(&lookup, "PYJUDGE_MAX_TEST_CASES") {
            settings.max_test_cases = n;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "PYJUDGE_CASE_TIMEOUT_MS") {
            settings.case_timeout_ns = ms.saturating_mul(1_000_000);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "PYJUDGE_DEFINE_TIMEOUT_MS") {
            settings.define_timeout_ns = ms.saturating_mul(1_000_000);
        }
        settings
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Structured failure of Python code running in the session.
///
/// Serialized with an internally-tagged `"type"` discriminator field.
///
/// # Examples (JSON)
/// ```json
/// {"type":"SyntaxError","message":"invalid syntax","line":1,"col":5}
/// {"type":"RuntimeError","message":"ZeroDivisionError: division by zero","traceback":"..."}
/// {"type":"Timeout","limit_ns":5000000000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionError {
    /// The Python source could not be parsed.
    #[error("SyntaxError: {message} (line {line}, column {col})")]
    SyntaxError {
        message: String,
        /// 1-based line number of the error, or 0 if unknown.
        line: u32,
        /// 1-based column number of the error, or 0 if unknown.
        col: u32,
    },

    /// A Python exception was raised.
    #[error("{message}")]
    RuntimeError {
        /// Final traceback line, e.g. `"ZeroDivisionError: division by zero"`.
        message: String,
        /// Python-formatted traceback, or empty if unavailable.
        traceback: String,
    },

    /// Execution exceeded its wall-clock limit.
    #[error("TimeoutError: execution exceeded {} ms", .limit_ns / 1_000_000)]
    Timeout { limit_ns: u64 },
}

/// Failures of the harness itself, as opposed to failures of the submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    #[error("Python environment is still loading...")]
    RuntimeNotReady,

    #[error("a run is already in progress")]
    RunInProgress,

    #[error("failed to load Python environment: {0}")]
    RuntimeLoad(String),

    #[error("runtime session lost: {0}")]
    SessionLost(String),
}
