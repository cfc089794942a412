//! Test harness orchestrator.
//!
//! A run walks `Idle → Running → (Executing → Comparing)* → Done`:
//! 1. Define the submission once. Failure is run-fatal.
//! 2. Discover the call target from the source.
//! 3. For each of the first `max_test_cases` cases: normalize the input, run it,
//!    compare the trimmed output with the expected value.
//! 4. Emit the transcript to the sink and return the [`RunReport`].
//!
//! [`TestHarness::poll`] is the trigger-driven entry point: it starts a run
//! only when a [`RunSignal`] is set and clears that signal however the run ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compare::outputs_match;
use crate::discover::discover;
use crate::host::{OutputSink, RuntimeHost};
use crate::normalize::normalize_input;
use crate::sandbox::Sandbox;
use crate::transcript;
use crate::types::{
    CallTarget, HarnessError, HarnessSettings, RunReport, TestCase, TestOutcome, TestStatus,
};

/// Diagnostic for every case of a submission with nothing to call.
pub const NOT_FOUND_MESSAGE: &str = "No function or Solution method found in submission";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunPhase {
    Idle,
    Running,
    Executing,
    Comparing,
    Done,
}

impl RunPhase {
    fn accepts_new_run(self) -> bool {
        matches!(self, RunPhase::Idle | RunPhase::Done)
    }
}

/// Shared "should run / is running" flag.
///
/// The caller sets it to request a run; the harness clears it when the run
/// it started has finished.
#[derive(Debug, Clone, Default)]
pub struct RunSignal(Arc<AtomicBool>);

impl RunSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Clears the signal on drop, unwinding included.
struct ClearOnDrop<'a>(&'a RunSignal);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.clear();
    }
}

/// Sets the phase to `Running` and back to `Done` on drop.
struct PhaseGuard<'a>(&'a Mutex<RunPhase>);

impl<'a> PhaseGuard<'a> {
    fn enter(phase: &'a Mutex<RunPhase>) -> Self {
        *phase.lock().expect("run phase mutex poisoned") = RunPhase::Running;
        Self(phase)
    }

    fn set(&self, next: RunPhase) {
        *self.0.lock().expect("run phase mutex poisoned") = next;
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut phase) = self.0.lock() {
            *phase = RunPhase::Done;
        }
    }
}

pub struct TestHarness {
    host: Arc<RuntimeHost>,
    settings: HarnessSettings,
    phase: Mutex<RunPhase>,
}

impl TestHarness {
    pub fn new(host: Arc<RuntimeHost>, settings: HarnessSettings) -> Self {
        Self {
            host,
            settings,
            phase: Mutex::new(RunPhase::Idle),
        }
    }

    pub fn host(&self) -> &Arc<RuntimeHost> {
        &self.host
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock().expect("run phase mutex poisoned")
    }

    /// Start a run if `signal` is set, the host is ready and no run is active.
    ///
    /// Returns `None` when no run was started. Once a run starts, `signal` is
    /// cleared on every exit path.
    pub fn poll(
        &self,
        code: &str,
        cases: &[TestCase],
        signal: &RunSignal,
        sink: &dyn OutputSink,
    ) -> Option<Result<RunReport, HarnessError>> {
        if !signal.is_set() || !self.host.is_ready() || !self.phase().accepts_new_run() {
            return None;
        }
        // Another harness on the same host may hold the gate; its run owns the signal.
        let _gate = self.host.try_begin_run().ok()?;
        let _clear = ClearOnDrop(signal);
        Some(self.run_locked(code, cases, sink))
    }

    /// Run `code` against the first `max_test_cases` of `cases`.
    ///
    /// The transcript is emitted to `sink` for fatal and non-fatal runs alike.
    /// Harness-level failures (runtime not ready, run already in progress) are
    /// returned as errors and produce no transcript.
    pub fn run(
        &self,
        code: &str,
        cases: &[TestCase],
        sink: &dyn OutputSink,
    ) -> Result<RunReport, HarnessError> {
        if !self.host.is_ready() {
            let err = HarnessError::RuntimeNotReady;
            sink.emit(&err.to_string());
            return Err(err);
        }
        let _gate = self.host.try_begin_run()?;
        self.run_locked(code, cases, sink)
    }

    /// Body of a run. The caller holds the host's run gate.
    fn run_locked(
        &self,
        code: &str,
        cases: &[TestCase],
        sink: &dyn OutputSink,
    ) -> Result<RunReport, HarnessError> {
        let phase = PhaseGuard::enter(&self.phase);

        let mut sandbox = Sandbox::open(&self.host, code, &self.settings)?;
        if let Err(err) = sandbox.define() {
            warn!(error = %err, "submission failed to define");
            let report = RunReport::fatal(err.to_string());
            sink.emit(&transcript::render(&report));
            return Ok(report);
        }

        let target = discover(code);
        let outcomes: Vec<TestOutcome> = cases
            .iter()
            .take(self.settings.max_test_cases)
            .enumerate()
            .map(|(i, case)| run_case(&mut sandbox, &phase, &target, i + 1, case))
            .collect();

        let report = RunReport::from_outcomes(outcomes);
        info!(
            passed = report.count(TestStatus::Passed),
            failed = report.count(TestStatus::Failed),
            errors = report.count(TestStatus::Error),
            all_passed = report.all_passed,
            "run finished"
        );
        sink.emit(&transcript::render(&report));
        Ok(report)
    }
}

fn run_case(
    sandbox: &mut Sandbox<'_>,
    phase: &PhaseGuard<'_>,
    target: &CallTarget,
    index: usize,
    case: &TestCase,
) -> TestOutcome {
    phase.set(RunPhase::Executing);
    let result = match target {
        CallTarget::NotFound => Err(NOT_FOUND_MESSAGE.to_owned()),
        _ => sandbox
            .run_case(target, &normalize_input(&case.input))
            .map_err(|err| err.to_string()),
    };

    phase.set(RunPhase::Comparing);
    let outcome = match result {
        Ok(captured) => {
            let actual = captured.trim().to_owned();
            let status = if outputs_match(&actual, &case.output) {
                TestStatus::Passed
            } else {
                TestStatus::Failed
            };
            TestOutcome {
                index,
                status,
                input: case.input.clone(),
                expected: case.output.clone(),
                actual: Some(actual),
                error_message: None,
            }
        }
        Err(message) => TestOutcome {
            index,
            status: TestStatus::Error,
            input: case.input.clone(),
            expected: case.output.clone(),
            actual: None,
            error_message: Some(message),
        },
    };
    debug!(index, status = outcome.status.as_str(), "test case finished");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_sink() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |text: &str| seen.lock().unwrap().push(text.to_owned())
        };
        (seen, sink)
    }

    #[test]
    fn test_run_before_ready_reports_loading() {
        let harness = TestHarness::new(RuntimeHost::new(), HarnessSettings::default());
        let (seen, sink) = collecting_sink();

        let result = harness.run("def f():\n    return 1\n", &[], &sink);

        assert_eq!(result, Err(HarnessError::RuntimeNotReady));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["Python environment is still loading...".to_owned()]
        );
        assert_eq!(harness.phase(), RunPhase::Idle);
    }

    #[test]
    fn test_poll_ignores_unset_signal_and_unready_host() {
        let harness = TestHarness::new(RuntimeHost::new(), HarnessSettings::default());
        let (seen, sink) = collecting_sink();
        let signal = RunSignal::new();

        assert!(harness.poll("", &[], &signal, &sink).is_none());

        signal.request();
        assert!(harness.poll("", &[], &signal, &sink).is_none());
        assert!(signal.is_set(), "signal must survive a poll that did not run");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_clear_on_drop_clears_during_unwind() {
        let signal = RunSignal::new();
        signal.request();
        let cloned = signal.clone();
        let result = std::panic::catch_unwind(move || {
            let _clear = ClearOnDrop(&cloned);
            panic!("run blew up");
        });
        assert!(result.is_err());
        assert!(!signal.is_set());
    }

    #[test]
    fn test_phase_guard_ends_in_done() {
        let phase = Mutex::new(RunPhase::Idle);
        {
            let guard = PhaseGuard::enter(&phase);
            assert_eq!(*phase.lock().unwrap(), RunPhase::Running);
            guard.set(RunPhase::Executing);
            assert!(!phase.lock().unwrap().accepts_new_run());
        }
        assert_eq!(*phase.lock().unwrap(), RunPhase::Done);
        assert!(RunPhase::Done.accepts_new_run());
    }
}
