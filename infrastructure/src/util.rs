//! Small shared helpers

const STDERR_TAIL_CHARS: usize = 512;

/// Last chunk of a child process's stderr, for error messages
pub(crate) fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim_end();
    match trimmed.char_indices().rev().nth(STDERR_TAIL_CHARS - 1) {
        Some((idx, _)) => trimmed[idx..].to_string(),
        None => trimmed.to_string(),
    }
}
