//! RustPython VM operations for the pyjudge library.
//!
//! This module owns all RustPython API calls. It:
//! - Builds the session interpreter with stdlib and the frozen helper modules.
//! - Defines a submission: runs its top-level code in a fresh global namespace.
//! - Invokes the call target for one test case and captures what it prints.
//! - Converts compile errors and exceptions into [`ExecutionError`].
//!
//! ## Stream capture
//!
//! [`StreamRedirect`] swaps `sys.stdout` / `sys.stderr` for writer objects that
//! feed an [`OutputBuffer`], and puts the previous objects back when dropped.
//! Every exit path of a definition or invocation therefore restores the
//! session's own streams, exceptions included.
//!
//! ## Argument binding
//!
//! Input assignments are executed with `exec(assignments, globals, locals)`
//! where `locals` is a fresh dict per test case. Only names present in that
//! dict count as bound; the submission's globals are visible to the
//! assignments but never mistaken for arguments.

use std::collections::HashSet;

use rustpython_vm::{
    builtins::{PyBaseExceptionRef, PyDictRef},
    compiler::Mode,
    function::FuncArgs,
    signal::UserSignalReceiver,
    AsObject, Interpreter, PyObjectRef, PyResult, TryFromObject, VirtualMachine,
};
use tracing::debug;

use crate::discover::SOLUTION_CLASS;
use crate::output::OutputBuffer;
use crate::types::{CallTarget, ExecutionError};

/// A session interpreter and the `sys.modules` snapshot taken right after boot.
///
/// Not `Send`: it lives and dies on its session thread.
pub(crate) struct PyInterp {
    inner: Interpreter,
    baseline_modules: HashSet<String>,
}

// ── Interpreter construction ─────────────────────────────────────────────────

/// Return candidate filesystem paths for a Python standard library installation.
///
/// Pure-Python stdlib modules (heapq, bisect, collections...) are loaded from a
/// host installation when one exists; native modules registered from
/// `rustpython_stdlib` take precedence.
fn python_stdlib_paths() -> Vec<String> {
    let candidates = [
        "/usr/local/lib/python3.12",
        "/usr/local/lib/python3.11",
        "/usr/local/lib/python3.10",
        "/usr/lib/python3",
        "/usr/lib/python3.12",
        "/usr/lib/python3.11",
        "/usr/lib/python3.10",
    ];
    candidates
        .iter()
        .filter(|p| std::path::Path::new(p).is_dir())
        .map(|p| p.to_string())
        .collect()
}

/// Create the session interpreter.
///
/// Besides the native stdlib, two small frozen modules are registered so
/// LeetCode-style submissions work without a host Python:
/// - `__future__`, needed by the `from __future__ import annotations` prefix;
/// - `typing`, with subscriptable placeholders for annotation names. Any name
///   not listed resolves to a placeholder through the module `__getattr__`.
///
/// Closures sent on the sender paired with `signals` run between bytecode
/// instructions; the session uses them to interrupt runaway code.
pub(crate) fn build_interpreter(signals: UserSignalReceiver) -> PyInterp {
    let mut settings = rustpython_vm::Settings::default();
    for path in python_stdlib_paths() {
        settings.path_list.push(path);
    }

    let inner = Interpreter::with_init(settings, move |vm| {
        vm.set_user_signal_channel(signals);
        vm.add_native_modules(rustpython_stdlib::get_module_inits());

        vm.add_frozen(rustpython_vm::py_freeze!(
            source = r#"
class _Feature:
    def __init__(self, optional, mandatory, flag):
        self.optional = optional
        self.mandatory = mandatory
        self.compiler_flag = flag

    def getOptionalRelease(self):
        return self.optional

    def getMandatoryRelease(self):
        return self.mandatory

all_feature_names = [
    "nested_scopes",
    "generators",
    "division",
    "absolute_import",
    "with_statement",
    "print_function",
    "unicode_literals",
    "generator_stop",
    "annotations",
]

nested_scopes = _Feature((2, 1, 0, "beta", 1), (2, 2, 0, "alpha", 0), 0x0010)
generators = _Feature((2, 2, 0, "alpha", 1), (2, 3, 0, "final", 0), 0)
division = _Feature((2, 2, 0, "alpha", 2), (3, 0, 0, "alpha", 0), 0x20000)
absolute_import = _Feature((2, 5, 0, "alpha", 1), (3, 0, 0, "alpha", 0), 0x40000)
with_statement = _Feature((2, 5, 0, "alpha", 1), (2, 6, 0, "alpha", 0), 0x80000)
print_function = _Feature((2, 6, 0, "alpha", 2), (3, 0, 0, "alpha", 0), 0x100000)
unicode_literals = _Feature((2, 6, 0, "alpha", 2), (3, 0, 0, "alpha", 0), 0x200000)
generator_stop = _Feature((3, 5, 0, "beta", 1), (3, 7, 0, "alpha", 0), 0x800000)
annotations = _Feature((3, 7, 0, "beta", 1), None, 0x1000000)
"#,
            module_name = "__future__"
        ));

        vm.add_frozen(rustpython_vm::py_freeze!(
            source = r#"
TYPE_CHECKING = False

class _Alias:
    def __init__(self, name):
        self._name = name

    def __getitem__(self, params):
        return self

    def __call__(self, *args, **kwargs):
        raise TypeError("typing." + self._name + " cannot be instantiated")

    def __repr__(self):
        return "typing." + self._name

Any = _Alias("Any")
Callable = _Alias("Callable")
Counter = _Alias("Counter")
DefaultDict = _Alias("DefaultDict")
Deque = _Alias("Deque")
Dict = _Alias("Dict")
FrozenSet = _Alias("FrozenSet")
Generator = _Alias("Generator")
Hashable = _Alias("Hashable")
Iterable = _Alias("Iterable")
Iterator = _Alias("Iterator")
List = _Alias("List")
Literal = _Alias("Literal")
Mapping = _Alias("Mapping")
Optional = _Alias("Optional")
OrderedDict = _Alias("OrderedDict")
Sequence = _Alias("Sequence")
Set = _Alias("Set")
Tuple = _Alias("Tuple")
Type = _Alias("Type")
Union = _Alias("Union")

def cast(typ, val):
    return val

def TypeVar(name, *constraints, **kwargs):
    return _Alias(name)

def overload(func):
    return func

def final(obj):
    return obj

def __getattr__(name):
    if name.startswith("__"):
        raise AttributeError("module 'typing' has no attribute " + repr(name))
    return _Alias(name)
"#,
            module_name = "typing"
        ));
    });

    let baseline_modules = inner.enter(loaded_module_names);
    PyInterp {
        inner,
        baseline_modules,
    }
}

// ── Definition and invocation ────────────────────────────────────────────────

/// Run the submission's top-level code in a fresh `__main__` namespace.
///
/// Modules imported by a previous definition are dropped from `sys.modules`
/// first. Anything the top-level code prints is captured and discarded.
///
/// Returns the namespace the test cases run against.
pub(crate) fn define_submission(
    interp: &PyInterp,
    source: &str,
) -> Result<PyDictRef, ExecutionError> {
    interp.inner.enter(|vm| {
        reset_sys_modules(vm, &interp.baseline_modules);

        let output = OutputBuffer::new();
        let result = {
            let _redirect = StreamRedirect::install(vm, output.clone());
            run_top_level(vm, source)
        };

        let (stdout, stderr) = output.into_strings();
        if !stdout.is_empty() || !stderr.is_empty() {
            debug!(%stdout, %stderr, "discarded output of submission top-level code");
        }
        result
    })
}

/// Execute `assignments`, call `target` with the bound parameters and print
/// its return value.
///
/// Returns the captured stdout, with stderr appended on its own line when
/// non-empty.
pub(crate) fn invoke_target(
    interp: &PyInterp,
    globals: &PyDictRef,
    target: &CallTarget,
    assignments: &str,
) -> Result<String, ExecutionError> {
    interp.inner.enter(|vm| {
        let output = OutputBuffer::new();
        let result = {
            let _redirect = StreamRedirect::install(vm, output.clone());
            call_with_inputs(vm, globals, target, assignments)
        };
        match result {
            Ok(()) => Ok(output.into_combined()),
            Err(exc) => Err(extract_runtime_error(vm, exc)),
        }
    })
}

fn run_top_level(vm: &VirtualMachine, source: &str) -> Result<PyDictRef, ExecutionError> {
    let code = vm
        .compile(source, Mode::Exec, "<submission>".to_owned())
        .map_err(extract_syntax_error)?;

    let scope = vm.new_scope_with_builtins();
    let _ = scope
        .globals
        .set_item("__name__", vm.ctx.new_str("__main__").into(), vm);

    match vm.run_code_obj(code, scope.clone()) {
        Ok(_) => Ok(scope.globals),
        Err(exc) => Err(extract_runtime_error(vm, exc)),
    }
}

fn call_with_inputs(
    vm: &VirtualMachine,
    globals: &PyDictRef,
    target: &CallTarget,
    assignments: &str,
) -> PyResult<()> {
    let locals = vm.ctx.new_dict();
    vm.builtins.get_attr("exec", vm)?.call(
        (vm.ctx.new_str(assignments), globals.clone(), locals.clone()),
        vm,
    )?;

    let mut args: Vec<PyObjectRef> = Vec::new();
    for name in target.param_names() {
        let key = vm.ctx.new_str(name.as_str());
        let bound = vm.call_method(locals.as_object(), "__contains__", (key.clone(),))?;
        if bool::try_from_object(vm, bound)? {
            args.push(vm.call_method(locals.as_object(), "__getitem__", (key,))?);
        }
    }

    let callable = match target {
        CallTarget::Method { name, .. } => {
            let class = global(vm, globals, SOLUTION_CLASS)?;
            let instance = class.call((), vm)?;
            vm.builtins
                .get_attr("getattr", vm)?
                .call((instance, vm.ctx.new_str(name.as_str())), vm)?
        }
        CallTarget::Function { name, .. } => global(vm, globals, name)?,
        CallTarget::NotFound => {
            return Err(vm.new_runtime_error("no callable to invoke".to_owned()));
        }
    };

    let value = callable.call(FuncArgs::from(args), vm)?;
    vm.builtins.get_attr("print", vm)?.call((value,), vm)?;
    Ok(())
}

fn global(vm: &VirtualMachine, globals: &PyDictRef, name: &str) -> PyResult {
    vm.call_method(globals.as_object(), "__getitem__", (vm.ctx.new_str(name),))
}

// ── Stream capture ───────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Scoped replacement of `sys.stdout` and `sys.stderr`.
///
/// The previous stream objects are put back on drop.
struct StreamRedirect<'vm> {
    vm: &'vm VirtualMachine,
    saved_stdout: Option<PyObjectRef>,
    saved_stderr: Option<PyObjectRef>,
}

impl<'vm> StreamRedirect<'vm> {
    fn install(vm: &'vm VirtualMachine, output: OutputBuffer) -> Self {
        let saved_stdout = vm.sys_module.get_attr("stdout", vm).ok();
        let saved_stderr = vm.sys_module.get_attr("stderr", vm).ok();

        let stdout_obj = build_writer_object(vm, output.clone(), Stream::Stdout);
        let stderr_obj = build_writer_object(vm, output, Stream::Stderr);
        let _ = vm.sys_module.set_attr("stdout", stdout_obj, vm);
        let _ = vm.sys_module.set_attr("stderr", stderr_obj, vm);

        Self {
            vm,
            saved_stdout,
            saved_stderr,
        }
    }
}

impl Drop for StreamRedirect<'_> {
    fn drop(&mut self) {
        if let Some(stdout) = self.saved_stdout.take() {
            let _ = self.vm.sys_module.set_attr("stdout", stdout, self.vm);
        }
        if let Some(stderr) = self.saved_stderr.take() {
            let _ = self.vm.sys_module.set_attr("stderr", stderr, self.vm);
        }
    }
}

/// Build a minimal file-like object with `write(s)` and `flush()`.
///
/// A module is used as the namespace since it accepts arbitrary attributes.
fn build_writer_object(vm: &VirtualMachine, output: OutputBuffer, stream: Stream) -> PyObjectRef {
    let write_fn = vm.new_function(
        "write",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let data: String = args
                .args
                .first()
                .and_then(|o| o.str(vm).ok())
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default();

            match stream {
                Stream::Stdout => output.write_stdout(data.as_bytes()),
                Stream::Stderr => output.write_stderr(data.as_bytes()),
            }
            Ok(vm.ctx.new_int(data.chars().count()).into())
        },
    );

    let flush_fn = vm.new_function(
        "flush",
        |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> { Ok(vm.ctx.none()) },
    );

    let ns = vm.new_module("<capture>", vm.ctx.new_dict(), None);
    let _ = ns.set_attr("write", write_fn, vm);
    let _ = ns.set_attr("flush", flush_fn, vm);
    let _ = ns.set_attr("closed", vm.ctx.new_bool(false), vm);
    let _ = ns.set_attr("encoding", vm.ctx.new_str("utf-8"), vm);
    ns.into()
}

// ── sys.modules snapshot and reset ───────────────────────────────────────────

fn loaded_module_names(vm: &VirtualMachine) -> HashSet<String> {
    let mut names = HashSet::new();
    let Ok(sys_modules) = vm.sys_module.get_attr("modules", vm) else {
        return names;
    };
    let Ok(keys) = vm.call_method(&sys_modules, "keys", ()) else {
        return names;
    };
    let Ok(iter) = vm.call_method(&keys, "__iter__", ()) else {
        return names;
    };
    while let Ok(key) = vm.call_method(&iter, "__next__", ()) {
        if let Ok(s) = key.str(vm) {
            names.insert(s.as_str().to_owned());
        }
    }
    names
}

/// Drop every `sys.modules` entry that was not loaded at boot.
fn reset_sys_modules(vm: &VirtualMachine, baseline: &HashSet<String>) {
    let Ok(sys_modules) = vm.sys_module.get_attr("modules", vm) else {
        return;
    };
    let stale: Vec<String> = loaded_module_names(vm)
        .into_iter()
        .filter(|name| !baseline.contains(name))
        .collect();
    for name in stale {
        let _ = vm.call_method(&sys_modules, "__delitem__", (vm.ctx.new_str(name),));
    }
}

// ── Error extraction ─────────────────────────────────────────────────────────

fn extract_syntax_error(err: rustpython_vm::compiler::CompileError) -> ExecutionError {
    let (row, col) = err.python_location();
    let text = err.to_string();
    ExecutionError::SyntaxError {
        message: without_location(&text).to_owned(),
        line: row as u32,
        col: col as u32,
    }
}

/// Strip the trailing `at row R col C` of a compile error's text.
///
/// The position lives in the `line`/`col` fields, where the annotations prefix
/// is taken back out; leaving it in the text would show the shifted row.
fn without_location(text: &str) -> &str {
    match text.rfind(" at row ") {
        Some(at) if text[at..].contains(" col ") => text[..at].trim_end(),
        _ => text,
    }
}

/// Convert an exception into [`ExecutionError::RuntimeError`].
///
/// The message is the last traceback line (`"NameError: name 'x' is not
/// defined"`); `str(exc)` is the fallback when no traceback can be written.
fn extract_runtime_error(vm: &VirtualMachine, exc: PyBaseExceptionRef) -> ExecutionError {
    let mut traceback = String::new();
    let _ = vm.write_exception(&mut traceback, &exc);

    let message = traceback
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_owned)
        .or_else(|| exc.as_object().str(vm).ok().map(|s| s.as_str().to_owned()))
        .unwrap_or_else(|| "Unknown runtime error".to_owned());

    ExecutionError::RuntimeError { message, traceback }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str, params: &[&str]) -> CallTarget {
        CallTarget::Function {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn interpreter() -> PyInterp {
        let (_interrupt, signals) = rustpython_vm::signal::user_signal_channel();
        build_interpreter(signals)
    }

    #[test]
    fn test_without_location_drops_row_and_col() {
        assert_eq!(
            without_location("invalid syntax. Got unexpected token ':' at row 3 col 7"),
            "invalid syntax. Got unexpected token ':'"
        );
        assert_eq!(without_location("unexpected EOF"), "unexpected EOF");
        assert_eq!(without_location("bad token at row 3"), "bad token at row 3");
    }

    #[test]
    #[ignore = "slow: VM init per test"]
    fn test_invoke_prints_return_value() {
        let interp = interpreter();
        let globals = define_submission(&interp, "def add(a, b):\n    return a + b\n")
            .expect("definition succeeds");
        let out = invoke_target(&interp, &globals, &function("add", &["a", "b"]), "a = 2\nb = 3")
            .expect("call succeeds");
        assert_eq!(out, "5\n");
    }

    #[test]
    #[ignore = "slow: VM init per test"]
    fn test_unbound_parameters_are_dropped() {
        let interp = interpreter();
        let globals = define_submission(&interp, "def f(a, b=10):\n    return a + b\n")
            .expect("definition succeeds");
        let out = invoke_target(&interp, &globals, &function("f", &["a", "b"]), "a = 1")
            .expect("call succeeds");
        assert_eq!(out, "11\n");
    }

    #[test]
    #[ignore = "slow: VM init per test"]
    fn test_streams_restored_after_exception() {
        let interp = interpreter();
        let globals = define_submission(&interp, "def boom():\n    raise ValueError('bad')\n")
            .expect("definition succeeds");
        let before = interp.inner.enter(|vm| vm.sys_module.get_attr("stdout", vm).ok());

        let err = invoke_target(&interp, &globals, &function("boom", &[]), "")
            .expect_err("call raises");
        match err {
            ExecutionError::RuntimeError { message, .. } => {
                assert_eq!(message, "ValueError: bad");
            }
            other => panic!("expected RuntimeError, got {other:?}"),
        }

        let after = interp.inner.enter(|vm| vm.sys_module.get_attr("stdout", vm).ok());
        match (before, after) {
            (Some(b), Some(a)) => assert!(b.is(&a), "sys.stdout was not restored"),
            (b, a) => assert_eq!(b.is_some(), a.is_some()),
        }
    }

    #[test]
    #[ignore = "slow: VM init per test"]
    fn test_syntax_error_is_structured() {
        let interp = interpreter();
        match define_submission(&interp, "x = 1\ndef f(:\n") {
            Err(ExecutionError::SyntaxError { message, line, .. }) => {
                assert_eq!(line, 2);
                assert!(!message.contains(" at row "), "got {message}");
            }
            other => panic!("expected SyntaxError, got {:?}", other.err()),
        }
    }

    #[test]
    #[ignore = "slow: VM init per test"]
    fn test_typing_and_future_names_resolve() {
        let interp = interpreter();
        let code = "\
from __future__ import division, print_function
from typing import Counter, Literal, NamedTuple

def half(n: Literal[1, 2]) -> float:
    return n / 2
";
        let globals = define_submission(&interp, code).expect("definition succeeds");
        let out = invoke_target(&interp, &globals, &function("half", &["n"]), "n = 3")
            .expect("call succeeds");
        assert_eq!(out, "1.5\n");
    }
}
