//! Thread-safe capture buffer for the session's standard streams.
//!
//! [`OutputBuffer`] accumulates what Python code writes to `sys.stdout` and
//! `sys.stderr` while a capture is installed. Clones share the same data via
//! `Arc<Mutex<_>>`, so the writer objects living inside the VM and the harness
//! reading the result can each hold a handle.

use std::sync::{Arc, Mutex};

#[derive(Default)]
struct OutputBufferInner {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// A shared buffer capturing stdout and stderr separately.
///
/// Cheap to clone; all clones see the same data.
#[derive(Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<OutputBufferInner>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `data` to the stdout stream.
    pub fn write_stdout(&self, data: &[u8]) {
        let mut inner = self.inner.lock().expect("OutputBuffer mutex poisoned");
        inner.stdout.extend_from_slice(data);
    }

    /// Appends `data` to the stderr stream.
    pub fn write_stderr(&self, data: &[u8]) {
        let mut inner = self.inner.lock().expect("OutputBuffer mutex poisoned");
        inner.stderr.extend_from_slice(data);
    }

    /// Returns `(stdout, stderr)` as UTF-8 strings.
    ///
    /// Invalid UTF-8 sequences are replaced with `\u{FFFD}`. Works whether or
    /// not other clones are still alive.
    pub fn into_strings(self) -> (String, String) {
        let inner = match Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex.into_inner().expect("OutputBuffer mutex poisoned"),
            Err(arc) => {
                let guard = arc.lock().expect("OutputBuffer mutex poisoned");
                OutputBufferInner {
                    stdout: guard.stdout.clone(),
                    stderr: guard.stderr.clone(),
                }
            }
        };
        (
            String::from_utf8_lossy(&inner.stdout).into_owned(),
            String::from_utf8_lossy(&inner.stderr).into_owned(),
        )
    }

    /// Captured text as the harness reports it: stdout, then stderr on its
    /// own line when non-empty.
    pub fn into_combined(self) -> String {
        let (stdout, stderr) = self.into_strings();
        if stderr.is_empty() {
            stdout
        } else {
            format!("{stdout}\n{stderr}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams_are_kept_apart() {
        let buf = OutputBuffer::new();
        buf.write_stdout(b"out");
        buf.write_stderr(b"err");
        let (stdout, stderr) = buf.into_strings();
        assert_eq!(stdout, "out");
        assert_eq!(stderr, "err");
    }

    #[test]
    fn test_clone_shares_state() {
        let buf = OutputBuffer::new();
        let writer = buf.clone();
        writer.write_stdout(b"from clone");
        assert_eq!(buf.into_strings().0, "from clone");
    }

    #[test]
    fn test_into_strings_with_live_clone() {
        let buf = OutputBuffer::new();
        buf.write_stdout(b"data");
        let _live_clone = buf.clone();
        let (stdout, stderr) = buf.into_strings();
        assert_eq!(stdout, "data");
        assert_eq!(stderr, "");
    }

    #[test]
    fn test_combined_appends_stderr_on_own_line() {
        let buf = OutputBuffer::new();
        buf.write_stdout(b"[0, 1]\n");
        buf.write_stderr(b"warning");
        assert_eq!(buf.into_combined(), "[0, 1]\n\nwarning");
    }

    #[test]
    fn test_combined_without_stderr_is_stdout() {
        let buf = OutputBuffer::new();
        buf.write_stdout(b"42\n");
        assert_eq!(buf.into_combined(), "42\n");
    }

    #[test]
    fn test_invalid_utf8_replaced_not_panic() {
        let buf = OutputBuffer::new();
        buf.write_stdout(&[0xFF]);
        buf.write_stderr(&[0xFE, 0x80]);
        let (stdout, stderr) = buf.into_strings();
        assert!(stdout.contains('\u{FFFD}'));
        assert!(stderr.contains('\u{FFFD}'));
    }
}
