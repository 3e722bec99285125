//! Leading-timestamp stripping.
//!
//! Applications frequently prepend their own timestamp even though the
//! journal records one; stripping it keeps MESSAGE clean and lets severity
//! keywords anchor at the start of the line.

use regex::bytes::Regex as BytesRegex;

/// Built-in timestamp patterns, anchored at byte 0. Order matters: more
/// specific patterns come first.
pub const DEFAULT_PATTERNS: [&str; 6] = [
    // Apache error log: Wed Oct 15 19:41:46.123456 2019
    r"^[A-Z][a-z]{2} [A-Z][a-z]{2}\s{1,2}\d{1,2} \d{2}:\d{2}:\d{2}(\.\d{1,6})? \d{4}",
    // ISO 8601 and common variants, optionally bracketed:
    //   2024-01-15T10:30:45.123456789Z
    //   2024-01-15T10:30:45.123+02:00
    //   2024-01-15 10:30:45,123 UTC
    // Timezone abbreviations are limited to Z/UTC/GMT so that level words
    // like ERROR or WARN never read as a timezone.
    r"^\[?\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}([.,]\d{1,9})?(Z|[+-]\d{2}:?\d{2})?(\s+(UTC|GMT))?\]?",
    // Go log / nginx error: 2024/01/15 10:30:45.000000
    r"^\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}(\.\d{1,6})?",
    // Apache/nginx CLF: 15/Oct/2024:10:30:45 +0200, optionally bracketed
    r"^\[?\d{2}/[A-Z][a-z]{2}/\d{4}:\d{2}:\d{2}:\d{2}\s*[+-]\d{4}\]?",
    // Log4j DATE format: 14 Nov 2017 20:30:20,434
    r"^\d{1,2} [A-Z][a-z]{2} \d{4} \d{2}:\d{2}:\d{2}([.,]\d{1,3})?",
    // Syslog: Jan 15 10:30:45 or Jan  5 10:30:45
    r"^[A-Z][a-z]{2}\s{1,2}\d{1,2} \d{2}:\d{2}:\d{2}",
];

/// Compiles a pattern list; used for both the built-in set and a
/// user-supplied pattern.
pub fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<BytesRegex>, regex::Error> {
    patterns.iter().map(|p| BytesRegex::new(p.as_ref())).collect()
}

/// Strips a leading timestamp using the first matching pattern, then any
/// run of separator bytes (whitespace, `:`, `|`, `-`) after it.
///
/// A line that would strip to nothing is returned unchanged, as is a line
/// no pattern matches.
pub fn strip_timestamp<'a>(line: &'a [u8], patterns: &[BytesRegex]) -> &'a [u8] {
    for pattern in patterns {
        let Some(found) = pattern.find(line) else {
            continue;
        };
        if found.start() != 0 {
            continue;
        }
        let mut rest = &line[found.end()..];
        while let [first, tail @ ..] = rest {
            if first.is_ascii_whitespace() || matches!(first, b':' | b'|' | b'-') {
                rest = tail;
            } else {
                break;
            }
        }
        if rest.is_empty() {
            return line;
        }
        return rest;
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Vec<BytesRegex> {
        compile_patterns(&DEFAULT_PATTERNS).expect("builtin patterns compile")
    }

    fn strip(line: &str) -> String {
        String::from_utf8_lossy(strip_timestamp(line.as_bytes(), &defaults())).into_owned()
    }

    #[test]
    fn test_iso8601_variants() {
        let cases = [
            ("2024-01-15T10:30:45 ERROR something", "ERROR something"),
            ("2024-01-15T10:30:45.123 ERROR something", "ERROR something"),
            ("2024-01-15 10:30:45,123 ERROR something", "ERROR something"),
            ("2024-01-15T10:30:45.123456 ERROR something", "ERROR something"),
            ("2024-01-15T10:30:45.123456789Z ERROR something", "ERROR something"),
            ("2024-01-15T10:30:45+02:00 ERROR something", "ERROR something"),
            ("2024-01-15T10:30:45+0200 ERROR something", "ERROR something"),
            ("2024-01-15 10:30:45.123 UTC ERROR something", "ERROR something"),
            ("2024-01-15 10:30:45 ERROR something", "ERROR something"),
            ("[2024-01-15 10:30:45] ERROR something", "ERROR something"),
            ("2024-01-15T10:30:45 - ERROR something", "ERROR something"),
            ("2024-01-15T10:30:45 | ERROR something", "ERROR something"),
            ("2024-01-15T10:30:45: ERROR something", "ERROR something"),
        ];
        for (line, want) in cases {
            assert_eq!(strip(line), want, "line {line:?}");
        }
    }

    #[test]
    fn test_short_timezone_names_not_stripped() {
        // CET would be ambiguous with level keywords, so it stays.
        assert_eq!(
            strip("2024-01-15 10:30:45.123 CET ERROR something"),
            "CET ERROR something"
        );
    }

    #[test]
    fn test_slash_date() {
        assert_eq!(strip("2024/01/15 10:30:45 message here"), "message here");
        assert_eq!(
            strip("2024/01/15 10:30:45.123456 message here"),
            "message here"
        );
    }

    #[test]
    fn test_syslog() {
        assert_eq!(strip("Jan 15 10:30:45 myhost message"), "myhost message");
        assert_eq!(strip("Jan  5 10:30:45 myhost message"), "myhost message");
        assert_eq!(strip("Dec 31 23:59:59 message"), "message");
    }

    #[test]
    fn test_apache_clf() {
        assert_eq!(
            strip("15/Oct/2024:10:30:45 +0200 GET /index.html"),
            "GET /index.html"
        );
        assert_eq!(
            strip("[15/Oct/2024:10:30:45 +0200] GET /index.html"),
            "GET /index.html"
        );
    }

    #[test]
    fn test_log4j_date() {
        assert_eq!(strip("14 Nov 2017 20:30:20,434 INFO message"), "INFO message");
    }

    #[test]
    fn test_apache_error() {
        assert_eq!(
            strip("Wed Oct 15 19:41:46.123456 2019 [error] message"),
            "[error] message"
        );
    }

    #[test]
    fn test_no_match_unchanged() {
        let cases = [
            "ERROR no timestamp here",
            "just a plain message",
            "[Warning] not a timestamp",
            "12345 not a timestamp",
            "",
        ];
        for line in cases {
            assert_eq!(strip(line), line);
        }
    }

    #[test]
    fn test_timestamp_only_line_unchanged() {
        // Stripping would leave nothing, so the original line stands.
        assert_eq!(strip("2024-01-15T10:30:45"), "2024-01-15T10:30:45");
    }

    #[test]
    fn test_custom_pattern() {
        // MySQL 5.6 short format: 230515 14:30:45
        let patterns =
            compile_patterns(&[r"^\d{6} \d{2}:\d{2}:\d{2}"]).expect("pattern compiles");
        let got = strip_timestamp(b"230515 14:30:45 [Note] message", &patterns);
        assert_eq!(got, b"[Note] message");
    }

    #[test]
    fn test_unanchored_custom_pattern_must_match_at_start() {
        let patterns = compile_patterns(&[r"\d{2}:\d{2}:\d{2}"]).expect("pattern compiles");
        let line = b"prefix 10:30:45 suffix";
        assert_eq!(strip_timestamp(line, &patterns), line);
    }
}
