//! Log-safe excerpts of model output.
//!
//! Model output is long, multi-line, and multi-byte. `&str[..n]` panics when
//! `n` splits a character, so previews snap to the nearest char boundary and
//! flatten newlines before landing in a log line.

use std::borrow::Cow;

/// Appended when a preview is truncated.
const ELLIPSIS: &str = "…";

/// A single-line excerpt of `s`, at most `max_bytes` of the original text.
///
/// Newlines collapse to spaces. Truncation never splits a character; a
/// truncated preview ends with an ellipsis. Borrows when the input already
/// fits on one line within the budget.
#[must_use]
pub fn preview(s: &str, max_bytes: usize) -> Cow<'_, str> {
    let fits = s.len() <= max_bytes;
    if fits && !s.contains('\n') {
        return Cow::Borrowed(s);
    }

    let mut end = s.len().min(max_bytes);
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut flat = s[..end].replace('\n', " ");
    if !fits {
        flat.push_str(ELLIPSIS);
    }
    Cow::Owned(flat)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
