//! Result comparator.
//!
//! Both sides are canonicalized before an exact comparison: the characters
//! `[`, `]`, `"` and `'` are removed, whitespace runs collapse to one space and
//! the ends are trimmed. `[2,7]` therefore equals `[2, 7]`, while the
//! comparison stays case-sensitive (`true` differs from `True`).

/// Canonical form used for comparison. Idempotent.
pub fn normalize_output(s: &str) -> String {
    let stripped: String = s
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | '"' | '\''))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `true` iff `actual` and `expected` have the same canonical form.
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}
