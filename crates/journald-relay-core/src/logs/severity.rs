//! Severity classification for merged messages.
//!
//! Precedence, first match wins:
//! 1. sd-daemon `<N>` prefix (stripped from the body),
//! 2. configured matchers in emerg → debug order (body unchanged),
//! 3. the per-source default.
//!
//! A JSON-derived level is applied upstream in the pipeline and bypasses
//! this classifier entirely.

use crate::config::{Config, Priority};
use crate::logs::StreamSource;

/// Classifies a message body and returns the priority together with the
/// body, which has the sd-daemon prefix stripped when one was consumed.
pub fn classify<'a>(cfg: &Config, line: &'a [u8], source: StreamSource) -> (Priority, &'a [u8]) {
    if cfg.priority_prefix {
        if let Some((priority, rest)) = split_sd_prefix(line) {
            return (priority, rest);
        }
    }

    for matcher in &cfg.priority_matchers {
        if matcher.regex.is_match(line) {
            return (matcher.priority, line);
        }
    }

    let default = match source {
        StreamSource::Stdout => cfg.priority_default_stdout,
        StreamSource::Stderr => cfg.priority_default_stderr,
    };
    (default, line)
}

/// Recognizes the exact 3-byte sd-daemon form `<N>` (N in 0..=7) at byte 0.
fn split_sd_prefix(line: &[u8]) -> Option<(Priority, &[u8])> {
    match line {
        [b'<', digit, b'>', rest @ ..] => Priority::from_digit(*digit).map(|p| (p, rest)),
        _ => None,
    }
}
