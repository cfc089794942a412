//! Runtime host bridge: owns the lazily-loaded runtime session.
//!
//! Lifecycle is `Unloaded → Loading → Ready`, one way. [`RuntimeHost::mount`]
//! starts the load on a background thread and returns immediately; callers
//! check [`RuntimeHost::is_ready`] or block on [`RuntimeHost::wait_ready`].
//! A failed load leaves the host in `Loading` for good.
//!
//! Runs are serialized through a run gate. The gate is taken with `try_lock`,
//! so a second concurrent run is refused rather than queued.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, TryLockError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::session::{self, SessionHandle};
use crate::types::HarnessError;

/// Message emitted to the mount sink when the runtime fails to load.
pub const LOAD_ERROR_MESSAGE: &str = "Error loading Python environment";

/// Destination for user-facing text: transcripts and host status messages.
pub trait OutputSink: Send + Sync {
    fn emit(&self, text: &str);
}

impl<F> OutputSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn emit(&self, text: &str) {
        self(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuntimeState {
    Unloaded,
    Loading,
    Ready,
}

struct HostInner {
    state: RuntimeState,
    session: Option<SessionHandle>,
    load_error: Option<String>,
}

/// Owner of the runtime session shared by all runs.
pub struct RuntimeHost {
    inner: Mutex<HostInner>,
    ready: Condvar,
    run_gate: Mutex<()>,
    next_session_id: AtomicUsize,
}

/// Proof that the caller holds the run gate. Released on drop.
pub(crate) struct RunGuard<'a> {
    _gate: MutexGuard<'a, ()>,
}

impl RuntimeHost {
    /// A fresh, unmounted host.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HostInner {
                state: RuntimeState::Unloaded,
                session: None,
                load_error: None,
            }),
            ready: Condvar::new(),
            run_gate: Mutex::new(()),
            next_session_id: AtomicUsize::new(0),
        })
    }

    /// The process-wide host. Created unmounted on first call.
    pub fn global() -> Arc<Self> {
        static INSTANCE: OnceLock<Arc<RuntimeHost>> = OnceLock::new();
        Arc::clone(INSTANCE.get_or_init(RuntimeHost::new))
    }

    /// Begin loading the runtime. Later calls are no-ops.
    ///
    /// `sink` receives [`LOAD_ERROR_MESSAGE`] if the load fails.
    pub fn mount<S>(self: &Arc<Self>, sink: S)
    where
        S: OutputSink + 'static,
    {
        {
            let mut inner = self.inner.lock().expect("host state mutex poisoned");
            if inner.state != RuntimeState::Unloaded {
                debug!(state = ?inner.state, "runtime host already mounted");
                return;
            }
            inner.state = RuntimeState::Loading;
        }
        info!("loading Python environment");

        let sink: Arc<dyn OutputSink> = Arc::new(sink);
        let host = Arc::clone(self);
        let loader_sink = Arc::clone(&sink);
        let spawned = std::thread::Builder::new()
            .name("pyjudge-loader".to_owned())
            .spawn(move || match session::spawn(host.next_id()) {
                Ok(handle) => host.finish_load(handle),
                Err(message) => host.fail_load(message, loader_sink.as_ref()),
            });

        if let Err(err) = spawned {
            self.fail_load(format!("failed to spawn loader thread: {err}"), sink.as_ref());
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.inner.lock().expect("host state mutex poisoned").state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == RuntimeState::Ready
    }

    /// Message of the failed load, if any.
    pub fn load_error(&self) -> Option<String> {
        self.inner
            .lock()
            .expect("host state mutex poisoned")
            .load_error
            .clone()
    }

    /// Block until the host is ready, the load has failed, or `timeout` elapses.
    ///
    /// Returns `true` iff the host is ready.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let inner = self.inner.lock().expect("host state mutex poisoned");
        let (inner, _) = self
            .ready
            .wait_timeout_while(inner, timeout, |inner| {
                inner.state != RuntimeState::Ready && inner.load_error.is_none()
            })
            .expect("host state mutex poisoned");
        inner.state == RuntimeState::Ready
    }

    pub(crate) fn session(&self) -> Option<SessionHandle> {
        self.inner
            .lock()
            .expect("host state mutex poisoned")
            .session
            .clone()
    }

    /// Abandon the current session and start a fresh one.
    ///
    /// The old session thread is left running; it exits once whatever it is
    /// executing returns, if ever.
    pub(crate) fn replace_session(&self) -> Result<SessionHandle, HarnessError> {
        let id = self.next_id();
        if let Some(old) = self.session() {
            warn!(old = old.id(), new = id, "abandoning wedged runtime session");
        }
        let handle = session::spawn(id).map_err(HarnessError::SessionLost)?;
        let mut inner = self.inner.lock().expect("host state mutex poisoned");
        inner.session = Some(handle.clone());
        Ok(handle)
    }

    pub(crate) fn try_begin_run(&self) -> Result<RunGuard<'_>, HarnessError> {
        match self.run_gate.try_lock() {
            Ok(gate) => Ok(RunGuard { _gate: gate }),
            // A panicking run cannot leave the unit value inconsistent.
            Err(TryLockError::Poisoned(poisoned)) => Ok(RunGuard {
                _gate: poisoned.into_inner(),
            }),
            Err(TryLockError::WouldBlock) => Err(HarnessError::RunInProgress),
        }
    }

    fn next_id(&self) -> usize {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    fn finish_load(&self, handle: SessionHandle) {
        let mut inner = self.inner.lock().expect("host state mutex poisoned");
        inner.session = Some(handle);
        inner.state = RuntimeState::Ready;
        self.ready.notify_all();
        info!("Python environment ready");
    }

    fn fail_load(&self, message: String, sink: &dyn OutputSink) {
        error!(error = %message, "{LOAD_ERROR_MESSAGE}");
        {
            let mut inner = self.inner.lock().expect("host state mutex poisoned");
            inner.load_error = Some(message);
            self.ready.notify_all();
        }
        sink.emit(LOAD_ERROR_MESSAGE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_host_is_unloaded_and_not_ready() {
        let host = RuntimeHost::new();
        assert_eq!(host.state(), RuntimeState::Unloaded);
        assert!(!host.is_ready());
        assert!(host.session().is_none());
        assert!(!host.wait_ready(Duration::from_millis(10)));
    }

    #[test]
    fn test_run_gate_refuses_second_run() {
        let host = RuntimeHost::new();
        let first = host.try_begin_run().expect("gate is free");
        assert_eq!(host.try_begin_run().err(), Some(HarnessError::RunInProgress));
        drop(first);
        assert!(host.try_begin_run().is_ok());
    }

    #[test]
    fn test_failed_load_stays_loading_and_reports_once() {
        let host = RuntimeHost::new();
        host.inner.lock().unwrap().state = RuntimeState::Loading;
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |text: &str| seen.lock().unwrap().push(text.to_owned())
        };

        host.fail_load("boom".to_owned(), &sink);

        assert_eq!(host.state(), RuntimeState::Loading);
        assert_eq!(host.load_error().as_deref(), Some("boom"));
        assert!(!host.wait_ready(Duration::from_secs(5)));
        assert_eq!(*seen.lock().unwrap(), vec![LOAD_ERROR_MESSAGE.to_owned()]);
    }

    #[test]
    fn test_global_returns_the_same_host() {
        assert!(Arc::ptr_eq(&RuntimeHost::global(), &RuntimeHost::global()));
    }
}
