//! Output cleaning.
//!
//! Turns the raw text read back from the shell into what the command
//! printed: terminal control sequences are stripped, the echoed command line
//! is dropped, and prompt lines and blank lines are filtered out.
//!
//! Prompt detection is a substring heuristic. A line of genuine output that
//! contains one of the prompt markers (for example `a > b`) is dropped along
//! with the real prompt lines.

use std::sync::LazyLock;

use regex_lite::Regex;

/// Literal substrings that identify a shell prompt line.
pub const PROMPT_MARKERS: [&str; 3] = ["$ ", "# ", "> "];

/// OSC strings, CSI sequences, and two-byte escapes. OSC comes first: the
/// CSI branch's `[` is optional, so it would take `ESC ]` on its own.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B\][^\x07\x1B]*(?:\x07|\x1B\\)|\x1B\[?.*?[ -/]*[@-~]|\x1B[@-Z\\-_]")
        .expect("escape sequence pattern is valid")
});

/// Removes terminal escape sequences from `text`.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Cleans raw shell output for `command` using the default prompt markers.
pub fn clean_output(command: &str, raw: &str) -> String {
    clean_output_with(command, raw, &PROMPT_MARKERS)
}

/// Cleans raw shell output for `command`.
///
/// The first line is dropped when it contains `command` (the echoed input).
/// Every other line is kept trimmed unless it is blank or contains one of
/// `prompt_markers`.
pub fn clean_output_with(command: &str, raw: &str, prompt_markers: &[&str]) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let stripped = strip_ansi(raw);
    let mut lines = split_lines(&stripped);

    if lines.first().is_some_and(|first| first.contains(command)) {
        lines.remove(0);
    }

    lines
        .into_iter()
        .filter(|line| !prompt_markers.iter().any(|marker| line.contains(marker)))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits on `\r\n`, `\r` and `\n`, without a trailing empty piece.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = text;

    while let Some(pos) = rest.find(['\r', '\n']) {
        lines.push(&rest[..pos]);
        let skip = if rest[pos..].starts_with("\r\n") { 2 } else { 1 };
        rest = &rest[pos + skip..];
    }
    if !rest.is_empty() {
        lines.push(rest);
    }

    lines
}
