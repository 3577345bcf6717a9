//! Post-processing: cosmetic cleanup of the merged service output.
//!
//! The service's Markdown is already structured; these rules only touch
//! whitespace. Content is never rewritten, reordered or dropped.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so that blank-line detection sees `\n`
//! only.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to a converted body.
///
/// 1. Normalise line endings (CRLF → LF)
/// 2. Collapse runs of three or more newlines to exactly two
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    collapse_blank_lines(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}
