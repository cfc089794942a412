//! Signature discovery: find the callable a submission defines.
//!
//! The source is parsed (never executed) with the same parser the VM compiles
//! with. Top-level statements are searched in order:
//! 1. `class Solution` → its first method, receiver (`self`) excluded.
//! 2. Otherwise the first top-level function.
//! 3. Otherwise [`CallTarget::NotFound`].
//!
//! Parameter names are the positional ones in declaration order, followed by
//! the `*args` name if present. Keyword-only and `**kwargs` parameters are not
//! supported and are ignored.

use rustpython_parser::{ast, Parse};
use tracing::{debug, warn};

use crate::types::CallTarget;

/// Name of the class whose first method is preferred as the entry point.
pub const SOLUTION_CLASS: &str = "Solution";

const RECEIVER: &str = "self";

/// Discover the call target of `source`.
///
/// Source that does not parse yields [`CallTarget::NotFound`].
pub fn discover(source: &str) -> CallTarget {
    let suite = match ast::Suite::parse(source, "<submission>") {
        Ok(suite) => suite,
        Err(err) => {
            warn!(error = %err, "submission did not parse during discovery");
            return CallTarget::NotFound;
        }
    };

    let target = solution_method(&suite)
        .or_else(|| first_function(&suite))
        .unwrap_or(CallTarget::NotFound);
    debug!(?target, "discovered call target");
    target
}

fn solution_method(suite: &[ast::Stmt]) -> Option<CallTarget> {
    let cls = suite.iter().find_map(|stmt| match stmt {
        ast::Stmt::ClassDef(cls) if cls.name.as_str() == SOLUTION_CLASS => Some(cls),
        _ => None,
    })?;

    cls.body.iter().find_map(|stmt| match stmt {
        ast::Stmt::FunctionDef(def) => Some(CallTarget::Method {
            name: def.name.as_str().to_owned(),
            params: param_names(&def.args, true),
        }),
        _ => None,
    })
}

fn first_function(suite: &[ast::Stmt]) -> Option<CallTarget> {
    suite.iter().find_map(|stmt| match stmt {
        ast::Stmt::FunctionDef(def) => Some(CallTarget::Function {
            name: def.name.as_str().to_owned(),
            params: param_names(&def.args, false),
        }),
        _ => None,
    })
}

fn param_names(args: &ast::Arguments, skip_receiver: bool) -> Vec<String> {
    let mut names: Vec<String> = args
        .posonlyargs
        .iter()
        .chain(args.args.iter())
        .map(|a| a.def.arg.as_str().to_owned())
        .collect();

    if skip_receiver && names.first().map(String::as_str) == Some(RECEIVER) {
        names.remove(0);
    }
    if let Some(vararg) = &args.vararg {
        names.push(vararg.arg.as_str().to_owned());
    }
    names
}
