//! Runtime session: one interpreter on one dedicated thread.
//!
//! The interpreter is not `Send`, so it is created on the session thread and
//! never leaves it. Callers talk to it through a [`SessionHandle`], which sends
//! a [`SessionRequest`] carrying a one-shot reply channel and waits on that
//! channel with a deadline.
//!
//! A request that misses its deadline is interrupted: the handle sends a user
//! signal that raises `TimeoutError` inside the running frame, and the session
//! stays usable once the request replies. Code that swallows the exception and
//! keeps running past [`INTERRUPT_GRACE`] cannot be stopped; the caller then
//! abandons the whole session and the host spawns a replacement.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustpython_vm::builtins::PyDictRef;
use rustpython_vm::signal::{user_signal_channel, UserSignalSender};
use rustpython_vm::VirtualMachine;
use tracing::{debug, info, warn};

use crate::types::{CallTarget, ExecutionError};
use crate::vm::{build_interpreter, define_submission, invoke_target};

/// How long an interrupted request has to reply before its session is abandoned.
pub(crate) const INTERRUPT_GRACE: Duration = Duration::from_secs(1);

/// The interrupt is re-sent at this interval while waiting out the grace period.
const INTERRUPT_RESEND: Duration = Duration::from_millis(50);

/// `running` value while the session waits for work.
const IDLE: u64 = 0;

type Reply<T> = SyncSender<Result<T, ExecutionError>>;

/// Work sent to a session thread. Every field is `Send`.
pub(crate) enum SessionRequest {
    /// Run a submission's top-level code in a fresh namespace, replacing the
    /// namespace of the previous definition.
    Define { source: String, reply: Reply<()> },
    /// Execute `assignments` and call `target` against the current namespace.
    Invoke {
        target: CallTarget,
        assignments: String,
        reply: Reply<String>,
    },
}

/// Why a session request produced no value.
#[derive(Debug)]
pub(crate) enum SessionError {
    /// Python-level failure; the session is healthy.
    Execution(ExecutionError),
    /// No reply within the deadline, but the interrupt stopped the request.
    /// The session is healthy.
    Interrupted { limit_ns: u64 },
    /// No reply within the deadline nor the interrupt grace period; the
    /// session must be abandoned.
    Timeout { limit_ns: u64 },
    /// The session thread is gone.
    Lost,
}

/// Cheap, cloneable handle to a session thread.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    id: usize,
    /// Requests are tagged with a sequence number so an interrupt that lands
    /// late cannot hit the request after the one it was meant for.
    tx: SyncSender<(u64, SessionRequest)>,
    interrupt: UserSignalSender,
    running: Arc<AtomicU64>,
    next_seq: Arc<AtomicU64>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

impl SessionHandle {
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn define(&self, source: &str, timeout_ns: u64) -> Result<(), SessionError> {
        let source = source.to_owned();
        self.request(|reply| SessionRequest::Define { source, reply }, timeout_ns)
    }

    pub(crate) fn invoke(
        &self,
        target: &CallTarget,
        assignments: &str,
        timeout_ns: u64,
    ) -> Result<String, SessionError> {
        let target = target.clone();
        let assignments = assignments.to_owned();
        self.request(
            |reply| SessionRequest::Invoke {
                target,
                assignments,
                reply,
            },
            timeout_ns,
        )
    }

    fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionRequest,
        timeout_ns: u64,
    ) -> Result<T, SessionError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.tx
            .send((seq, build(reply_tx)))
            .map_err(|_| SessionError::Lost)?;

        match reply_rx.recv_timeout(Duration::from_nanos(timeout_ns)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(SessionError::Execution(err)),
            Err(RecvTimeoutError::Timeout) => Err(self.interrupt(seq, &reply_rx, timeout_ns)),
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::Lost),
        }
    }

    /// Raise `TimeoutError` in request `seq` and wait for it to unwind.
    ///
    /// Any reply within the grace period, late success included, means the
    /// session is free again.
    fn interrupt<T>(
        &self,
        seq: u64,
        reply_rx: &Receiver<Result<T, ExecutionError>>,
        limit_ns: u64,
    ) -> SessionError {
        let deadline = Instant::now() + INTERRUPT_GRACE;
        loop {
            let running = Arc::clone(&self.running);
            let limit_ms = limit_ns / 1_000_000;
            let sent = self.interrupt.send(Box::new(move |vm: &VirtualMachine| {
                if running.load(Ordering::SeqCst) != seq {
                    return Ok(());
                }
                Err(vm.new_exception_msg(
                    vm.ctx.exceptions.timeout_error.to_owned(),
                    format!("execution exceeded {limit_ms} ms"),
                ))
            }));
            if sent.is_err() {
                return SessionError::Lost;
            }

            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                warn!(id = self.id, "interrupted request did not stop");
                return SessionError::Timeout { limit_ns };
            }
            match reply_rx.recv_timeout(left.min(INTERRUPT_RESEND)) {
                Ok(_) => {
                    debug!(id = self.id, "request interrupted");
                    return SessionError::Interrupted { limit_ns };
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return SessionError::Lost,
            }
        }
    }
}

/// Start session `id` and block until its interpreter is ready.
///
/// Returns a description of the failure if the thread cannot be spawned or
/// dies while building the interpreter.
pub(crate) fn spawn(id: usize) -> Result<SessionHandle, String> {
    // Capacity 1: a session serves one request at a time.
    let (tx, rx) = mpsc::sync_channel::<(u64, SessionRequest)>(1);
    let (ready_tx, ready_rx) = mpsc::sync_channel::<()>(1);
    let (interrupt, signals) = user_signal_channel();
    let running = Arc::new(AtomicU64::new(IDLE));

    let session_running = Arc::clone(&running);
    std::thread::Builder::new()
        .name(format!("pyjudge-session-{id}"))
        .spawn(move || {
            let running = session_running;
            let interp = build_interpreter(signals);
            let mut globals: Option<PyDictRef> = None;
            if ready_tx.send(()).is_err() {
                return;
            }

            while let Ok((seq, request)) = rx.recv() {
                running.store(seq, Ordering::SeqCst);
                match request {
                    SessionRequest::Define { source, reply } => {
                        globals = None;
                        let result = match define_submission(&interp, &source) {
                            Ok(namespace) => {
                                globals = Some(namespace);
                                Ok(())
                            }
                            Err(err) => Err(err),
                        };
                        let _ = reply.send(result);
                    }
                    SessionRequest::Invoke {
                        target,
                        assignments,
                        reply,
                    } => {
                        let result = match &globals {
                            Some(namespace) => {
                                invoke_target(&interp, namespace, &target, &assignments)
                            }
                            None => Err(ExecutionError::RuntimeError {
                                message: "RuntimeError: submission is not defined".to_owned(),
                                traceback: String::new(),
                            }),
                        };
                        // The caller may have timed out and gone away.
                        let _ = reply.send(result);
                    }
                }
                running.store(IDLE, Ordering::SeqCst);
            }
            debug!(id, "session thread exiting");
        })
        .map_err(|err| format!("failed to spawn session thread: {err}"))?;

    ready_rx
        .recv()
        .map_err(|_| "session thread exited while building the interpreter".to_owned())?;
    info!(id, "runtime session ready");
    Ok(SessionHandle {
        id,
        tx,
        interrupt,
        running,
        next_seq: Arc::new(AtomicU64::new(IDLE + 1)),
    })
}
