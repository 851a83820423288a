//! Reply rendering for the messaging front end.

use terminal::TerminalError;

/// Renders a command result as `{cwd}> {command}` followed by its output.
pub fn format_reply(cwd: &str, command: &str, output: &str) -> String {
    format!("{cwd}> {command}\n{output}")
}

/// Renders a failure for the user. Timeouts get their own notice.
pub fn render_error(error: &TerminalError) -> String {
    if error.is_timeout() {
        "Command execution timed out".to_string()
    } else {
        format!("Error: {error}")
    }
}

/// Splits `text` into pieces of at most `max_len` characters.
///
/// Splits only on character boundaries. Empty text yields no pieces.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for c in text.chars() {
        if count == max_len {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(c);
        count += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
