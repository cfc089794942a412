//! Execution sandbox: defines a submission and runs test cases against it.
//!
//! A [`Sandbox`] lives for one run. A case that overruns its deadline is
//! normally interrupted in place. When it cannot be, the host swaps in a fresh
//! session and the sandbox defines the kept source there again, so the
//! remaining cases still run.

use tracing::{error, warn};

use crate::host::RuntimeHost;
use crate::session::{SessionError, SessionHandle};
use crate::types::{CallTarget, ExecutionError, HarnessError, HarnessSettings};

const FUTURE_ANNOTATIONS: &str = "from __future__ import annotations\n";

pub(crate) struct Sandbox<'h> {
    host: &'h RuntimeHost,
    session: SessionHandle,
    source: String,
    prefix_lines: u32,
    settings: &'h HarnessSettings,
}

impl<'h> Sandbox<'h> {
    pub(crate) fn open(
        host: &'h RuntimeHost,
        code: &str,
        settings: &'h HarnessSettings,
    ) -> Result<Self, HarnessError> {
        let session = host.session().ok_or(HarnessError::RuntimeNotReady)?;
        let (source, prefix_lines) = if settings.postpone_annotations {
            (format!("{FUTURE_ANNOTATIONS}{code}"), 1)
        } else {
            (code.to_owned(), 0)
        };
        Ok(Self {
            host,
            session,
            source,
            prefix_lines,
            settings,
        })
    }

    /// Run the submission's top-level code. Any error is run-fatal.
    pub(crate) fn define(&mut self) -> Result<(), ExecutionError> {
        match self.session.define(&self.source, self.settings.define_timeout_ns) {
            Ok(()) => Ok(()),
            Err(SessionError::Execution(err)) => Err(self.unshift(err)),
            Err(SessionError::Interrupted { limit_ns }) => {
                warn!(limit_ms = limit_ns / 1_000_000, "submission definition timed out");
                Err(ExecutionError::Timeout { limit_ns })
            }
            Err(SessionError::Timeout { limit_ns }) => {
                self.replace_session();
                Err(ExecutionError::Timeout { limit_ns })
            }
            Err(SessionError::Lost) => {
                self.replace_session();
                Err(session_lost())
            }
        }
    }

    /// Execute one case's assignments and call the target.
    ///
    /// Returns the combined captured output, untrimmed.
    pub(crate) fn run_case(
        &mut self,
        target: &CallTarget,
        assignments: &str,
    ) -> Result<String, ExecutionError> {
        match self
            .session
            .invoke(target, assignments, self.settings.case_timeout_ns)
        {
            Ok(output) => Ok(output),
            Err(SessionError::Execution(err)) => Err(err),
            Err(SessionError::Interrupted { limit_ns }) => {
                warn!(limit_ms = limit_ns / 1_000_000, "test case timed out");
                Err(ExecutionError::Timeout { limit_ns })
            }
            Err(SessionError::Timeout { limit_ns }) => {
                warn!(
                    limit_ms = limit_ns / 1_000_000,
                    "test case timed out and could not be interrupted"
                );
                self.recover();
                Err(ExecutionError::Timeout { limit_ns })
            }
            Err(SessionError::Lost) => {
                self.recover();
                Err(session_lost())
            }
        }
    }

    /// Swap in a fresh session and define the submission there again.
    fn recover(&mut self) {
        if !self.replace_session() {
            return;
        }
        if let Err(err) = self.session.define(&self.source, self.settings.define_timeout_ns) {
            error!(?err, "redefinition in replacement session failed");
        }
    }

    fn replace_session(&mut self) -> bool {
        match self.host.replace_session() {
            Ok(session) => {
                self.session = session;
                true
            }
            Err(err) => {
                error!(%err, "could not replace runtime session");
                false
            }
        }
    }

    /// Report syntax error lines relative to the submission as written.
    fn unshift(&self, err: ExecutionError) -> ExecutionError {
        match err {
            ExecutionError::SyntaxError { message, line, col } if line > self.prefix_lines => {
                ExecutionError::SyntaxError {
                    message,
                    line: line - self.prefix_lines,
                    col,
                }
            }
            other => other,
        }
    }
}

fn session_lost() -> ExecutionError {
    ExecutionError::RuntimeError {
        message: HarnessError::SessionLost("session thread exited".to_owned()).to_string(),
        traceback: String::new(),
    }
}
