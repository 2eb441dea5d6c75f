//! Helpers for putting untrusted text (QSO comments, raw datagrams, eQSL.cc
//! responses) into single-line log entries.

use std::fmt::Write;

/// Log a contact or upload outcome under the `qso` target, which `main`
/// also appends to the configured QSO log file.
macro_rules! qso_log {
    ($level:ident, $($arg:tt)*) => { log::$level!(target: "qso", $($arg)*); };
}
pub(crate) use qso_log;

/// Longest escaped preview emitted into a log line.
pub const LOG_PREVIEW_CHARS: usize = 200;

/// Escape `s` so it stays on one log line, truncating to
/// [`LOG_PREVIEW_CHARS`] characters with a trailing ellipsis.
pub fn escape_log(s: &str) -> String {
    escape_truncated(s, LOG_PREVIEW_CHARS)
}

/// Escape backslashes and control characters, keeping at most `max` source
/// characters.
pub fn escape_truncated(s: &str, max: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= max {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Lossy, escaped preview of a raw datagram for decode-failure logs.
pub fn payload_preview(payload: &[u8], max: usize) -> String {
    escape_truncated(&String::from_utf8_lossy(payload), max)
}
