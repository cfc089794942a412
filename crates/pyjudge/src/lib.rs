// pyjudge: run LeetCode-style Python submissions against test cases on an embedded RustPython VM.

pub mod compare;
pub mod discover;
pub mod harness;
pub mod host;
pub mod normalize;
pub mod output;
pub(crate) mod sandbox;
pub(crate) mod session;
pub mod transcript;
pub mod types;
pub(crate) mod vm;

pub use compare::{normalize_output, outputs_match};
pub use discover::{discover, SOLUTION_CLASS};
pub use harness::{RunPhase, RunSignal, TestHarness, NOT_FOUND_MESSAGE};
pub use host::{OutputSink, RuntimeHost, RuntimeState, LOAD_ERROR_MESSAGE};
pub use normalize::normalize_input;
pub use output::OutputBuffer;
pub use transcript::render as render_transcript;
pub use types::{
    CallTarget, ExecutionError, HarnessError, HarnessSettings, RunReport, TestCase, TestOutcome,
    TestStatus, DEFAULT_MAX_TEST_CASES, DEFAULT_TIMEOUT_NS,
};
