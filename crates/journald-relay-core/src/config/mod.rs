//! Per-container configuration parsed from the log-opt key/value map.
//!
//! Every option is validated up front; a bad value fails the whole parse so
//! that `StartLogging` can reject the container before any log is consumed.
//! Unknown keys are rejected outright, except for the open-ended `field-*`
//! extractor namespace.

pub mod priority;

use std::collections::HashMap;
use std::time::Duration;

use regex::bytes::Regex as BytesRegex;
use regex::Regex;

pub use priority::{Priority, ALL_PRIORITIES};

use crate::logs::timestamp;

/// Default continuation pattern: lines starting with whitespace.
const DEFAULT_MULTILINE_REGEX: &str = r"^\s";

const DEFAULT_MULTILINE_TIMEOUT: Duration = Duration::from_millis(10);
const DEFAULT_MULTILINE_MAX_LINES: usize = 100;
const DEFAULT_MULTILINE_MAX_BYTES: usize = 1_048_576;
const DEFAULT_MULTILINE_SEPARATOR: &str = "\n";

/// Default severity matchers, in emerg → debug order. Each pattern tolerates
/// up to 30 leading characters so that annotated or timestamp-prefixed lines
/// still match.
const DEFAULT_PRIORITY_MATCHERS: [(Priority, &str); 5] = [
    (Priority::Crit, r"^.{0,30}(CRITICAL|\[Critical\])"),
    (Priority::Err, r"^.{0,30}(ERROR|FATAL|\[ERROR\]|\[Fatal\])"),
    (Priority::Warning, r"^.{0,30}(WARN|WARNING|\[Warning\])"),
    (Priority::Notice, r"^.{0,30}\[Note\]"),
    (Priority::Debug, r"^.{0,30}(DEBUG|\[Debug\])"),
];

const DEFAULT_JSON_LEVEL_KEYS: [&str; 3] = ["level", "severity", "log_level"];
const DEFAULT_JSON_MESSAGE_KEYS: [&str; 3] = ["message", "msg", "log"];

/// Fixed option keys. Anything else (other than `field-*`) fails parsing.
const KNOWN_OPTS: [&str; 23] = [
    "tag",
    "labels",
    "labels-regex",
    "env",
    "env-regex",
    "multiline-regex",
    "multiline-timeout",
    "multiline-max-lines",
    "multiline-max-bytes",
    "multiline-separator",
    "priority-prefix",
    "priority-default-stdout",
    "priority-default-stderr",
    "priority-match-emerg",
    "priority-match-alert",
    "priority-match-crit",
    "priority-match-err",
    "priority-match-warning",
    "priority-match-notice",
    "priority-match-info",
    "priority-match-debug",
    "strip-timestamp",
    "strip-timestamp-regex",
];

const KNOWN_JSON_OPTS: [&str; 3] = ["parse-json", "json-level-keys", "json-message-keys"];

const FIELD_OPT_PREFIX: &str = "field-";

/// Errors produced while validating log options.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown log-opt {0:?}")]
    UnknownKey(String),

    #[error("invalid {key} {value:?}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: impl ToString) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A single severity matcher: the first matching pattern (in emerg → debug
/// order) decides the priority.
#[derive(Debug, Clone)]
pub struct PriorityMatcher {
    pub priority: Priority,
    pub regex: BytesRegex,
}

/// A user-defined journal field extracted from the message body by regex.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    pub name: String,
    pub regex: BytesRegex,
}

/// Parsed and validated configuration for a single container. Immutable
/// after parse.
#[derive(Debug, Clone)]
pub struct Config {
    pub tag: String,
    pub labels: Vec<String>,
    pub labels_regex: Option<Regex>,
    pub env: Vec<String>,
    pub env_regex: Option<Regex>,

    /// `None` disables multiline merging entirely.
    pub multiline_regex: Option<BytesRegex>,
    pub multiline_timeout: Duration,
    pub multiline_max_lines: usize,
    pub multiline_max_bytes: usize,
    pub multiline_separator: String,

    pub priority_prefix: bool,
    pub priority_default_stdout: Priority,
    pub priority_default_stderr: Priority,
    /// Ordered emerg → debug.
    pub priority_matchers: Vec<PriorityMatcher>,

    pub strip_timestamp: bool,
    pub strip_timestamp_patterns: Vec<BytesRegex>,

    pub parse_json: bool,
    pub json_level_keys: Vec<String>,
    pub json_message_keys: Vec<String>,

    /// Ordered by option key.
    pub field_extractors: Vec<FieldExtractor>,
}

impl Config {
    /// Validates and parses a map of log-opt key/value pairs.
    pub fn parse(opts: &HashMap<String, String>) -> Result<Self, ConfigError> {
        for key in opts.keys() {
            let known = KNOWN_OPTS.contains(&key.as_str())
                || KNOWN_JSON_OPTS.contains(&key.as_str())
                || key.starts_with(FIELD_OPT_PREFIX);
            if !known {
                return Err(ConfigError::UnknownKey(key.clone()));
            }
        }

        let mut cfg = Config {
            tag: opts.get("tag").cloned().unwrap_or_default(),
            labels: Vec::new(),
            labels_regex: None,
            env: Vec::new(),
            env_regex: None,
            multiline_regex: None,
            multiline_timeout: DEFAULT_MULTILINE_TIMEOUT,
            multiline_max_lines: DEFAULT_MULTILINE_MAX_LINES,
            multiline_max_bytes: DEFAULT_MULTILINE_MAX_BYTES,
            multiline_separator: DEFAULT_MULTILINE_SEPARATOR.to_string(),
            priority_prefix: true,
            priority_default_stdout: Priority::Info,
            priority_default_stderr: Priority::Err,
            priority_matchers: Vec::new(),
            strip_timestamp: false,
            strip_timestamp_patterns: Vec::new(),
            parse_json: false,
            json_level_keys: DEFAULT_JSON_LEVEL_KEYS
                .iter()
                .map(ToString::to_string)
                .collect(),
            json_message_keys: DEFAULT_JSON_MESSAGE_KEYS
                .iter()
                .map(ToString::to_string)
                .collect(),
            field_extractors: Vec::new(),
        };

        // Label and env selection
        if let Some(v) = opts.get("labels") {
            cfg.labels = parse_list(v);
        }
        if let Some(v) = opts.get("labels-regex") {
            if !v.is_empty() {
                cfg.labels_regex = Some(compile_key_regex("labels-regex", v)?);
            }
        }
        if let Some(v) = opts.get("env") {
            cfg.env = parse_list(v);
        }
        if let Some(v) = opts.get("env-regex") {
            if !v.is_empty() {
                cfg.env_regex = Some(compile_key_regex("env-regex", v)?);
            }
        }

        // Multiline: an explicit empty regex disables merging entirely.
        match opts.get("multiline-regex") {
            Some(v) if v.is_empty() => cfg.multiline_regex = None,
            Some(v) => cfg.multiline_regex = Some(compile_line_regex("multiline-regex", v)?),
            None => {
                cfg.multiline_regex = Some(compile_line_regex(
                    "multiline-regex",
                    DEFAULT_MULTILINE_REGEX,
                )?);
            }
        }
        if let Some(v) = opts.get("multiline-timeout") {
            let d = parse_duration("multiline-timeout", v)?;
            if d.is_zero() {
                return Err(ConfigError::invalid(
                    "multiline-timeout",
                    v,
                    "must be positive",
                ));
            }
            cfg.multiline_timeout = d;
        }
        if let Some(v) = opts.get("multiline-max-lines") {
            cfg.multiline_max_lines = parse_positive_int("multiline-max-lines", v)?;
        }
        if let Some(v) = opts.get("multiline-max-bytes") {
            cfg.multiline_max_bytes = parse_positive_int("multiline-max-bytes", v)?;
        }
        if let Some(v) = opts.get("multiline-separator") {
            cfg.multiline_separator = v.clone();
        }

        // Priority policy
        if let Some(v) = opts.get("priority-prefix") {
            cfg.priority_prefix = parse_bool("priority-prefix", v)?;
        }
        if let Some(v) = opts.get("priority-default-stdout") {
            cfg.priority_default_stdout = parse_priority_name("priority-default-stdout", v)?;
        }
        if let Some(v) = opts.get("priority-default-stderr") {
            cfg.priority_default_stderr = parse_priority_name("priority-default-stderr", v)?;
        }

        // Severity matchers in emerg → debug order. A configured empty string
        // disables the matcher for that level, including its default.
        for priority in ALL_PRIORITIES {
            let key = format!("priority-match-{}", priority.name());
            let pattern = match opts.get(&key) {
                Some(v) if v.is_empty() => continue,
                Some(v) => v.as_str(),
                None => match default_matcher_pattern(priority) {
                    Some(p) => p,
                    None => continue,
                },
            };
            cfg.priority_matchers.push(PriorityMatcher {
                priority,
                regex: compile_line_regex(&key, pattern)?,
            });
        }

        // Timestamp stripping
        if let Some(v) = opts.get("strip-timestamp") {
            cfg.strip_timestamp = parse_bool("strip-timestamp", v)?;
        }
        cfg.strip_timestamp_patterns = match opts.get("strip-timestamp-regex") {
            Some(v) if !v.is_empty() => vec![compile_line_regex("strip-timestamp-regex", v)?],
            _ => timestamp::compile_patterns(&timestamp::DEFAULT_PATTERNS)
                .map_err(|e| ConfigError::invalid("strip-timestamp-regex", "", e))?,
        };

        // JSON body extraction
        if let Some(v) = opts.get("parse-json") {
            cfg.parse_json = parse_bool("parse-json", v)?;
        }
        if let Some(v) = opts.get("json-level-keys") {
            if !v.is_empty() {
                cfg.json_level_keys = parse_list(v);
            }
        }
        if let Some(v) = opts.get("json-message-keys") {
            if !v.is_empty() {
                cfg.json_message_keys = parse_list(v);
            }
        }

        // Field extractors, ordered by option key for deterministic output.
        let mut field_keys: Vec<&String> = opts
            .keys()
            .filter(|k| k.starts_with(FIELD_OPT_PREFIX))
            .collect();
        field_keys.sort();
        for key in field_keys {
            let suffix = &key[FIELD_OPT_PREFIX.len()..];
            if suffix.is_empty() {
                return Err(ConfigError::invalid(key, "", "field name must not be empty"));
            }
            let value = &opts[key];
            let regex = compile_line_regex(key, value)?;
            if regex.captures_len() < 2 {
                return Err(ConfigError::invalid(
                    key,
                    value,
                    "pattern must contain at least one capture group",
                ));
            }
            cfg.field_extractors.push(FieldExtractor {
                name: crate::journal::sanitize_field_name(suffix),
                regex,
            });
        }

        Ok(cfg)
    }
}

fn default_matcher_pattern(priority: Priority) -> Option<&'static str> {
    DEFAULT_PRIORITY_MATCHERS
        .iter()
        .find(|(p, _)| *p == priority)
        .map(|(_, pattern)| *pattern)
}

/// Splits a comma-separated option value, trimming each element and
/// dropping empties.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn compile_key_regex(key: &str, value: &str) -> Result<Regex, ConfigError> {
    Regex::new(value).map_err(|e| ConfigError::invalid(key, value, e))
}

fn compile_line_regex(key: &str, value: &str) -> Result<BytesRegex, ConfigError> {
    BytesRegex::new(value).map_err(|e| ConfigError::invalid(key, value, e))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "must be true or false")),
    }
}

fn parse_positive_int(key: &str, value: &str) -> Result<usize, ConfigError> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::invalid(
            key,
            value,
            "must be a positive integer",
        )),
    }
}

fn parse_priority_name(key: &str, value: &str) -> Result<Priority, ConfigError> {
    Priority::from_name(value).ok_or_else(|| {
        ConfigError::invalid(
            key,
            value,
            "unknown priority (valid: emerg, alert, crit, err, warning, notice, info, debug)",
        )
    })
}

/// Parses a duration of the form `<decimal><unit>[...]`, e.g. `10ms`,
/// `1.5s` or `1m30s`. Units: ns, us, ms, s, m, h.
fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let s = value.trim();
    if s.is_empty() {
        return Err(ConfigError::invalid(key, value, "empty duration"));
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(digits);
        let magnitude: f64 = number
            .parse()
            .map_err(|_| ConfigError::invalid(key, value, "malformed duration"))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, remainder) = tail.split_at(unit_len);
        let nanos_per_unit = match unit {
            "ns" => 1.0,
            "us" | "\u{b5}s" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3_600e9,
            _ => {
                return Err(ConfigError::invalid(
                    key,
                    value,
                    format!("unknown duration unit {unit:?}"),
                ))
            }
        };
        total_nanos += magnitude * nanos_per_unit;
        rest = remainder;
    }

    Ok(Duration::from_nanos(total_nanos as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::parse(&HashMap::new()).expect("parse");

        let continuation = cfg.multiline_regex.as_ref().expect("default regex");
        assert!(continuation.is_match(b" continuation"));
        assert!(continuation.is_match(b"\tcontinuation"));
        assert!(!continuation.is_match(b"new line"));

        assert_eq!(cfg.multiline_timeout, Duration::from_millis(10));
        assert_eq!(cfg.multiline_max_lines, 100);
        assert_eq!(cfg.multiline_max_bytes, 1_048_576);
        assert_eq!(cfg.multiline_separator, "\n");

        assert!(cfg.priority_prefix);
        assert_eq!(cfg.priority_default_stdout, Priority::Info);
        assert_eq!(cfg.priority_default_stderr, Priority::Err);

        assert!(!cfg.strip_timestamp);
        assert!(!cfg.parse_json);
        assert_eq!(cfg.json_level_keys, ["level", "severity", "log_level"]);
        assert_eq!(cfg.json_message_keys, ["message", "msg", "log"]);
        assert!(cfg.field_extractors.is_empty());
    }

    #[test]
    fn test_default_matchers_cover_common_formats() {
        let cfg = Config::parse(&HashMap::new()).expect("parse");

        let cases: &[(&[u8], Priority)] = &[
            (b"ERROR something broke", Priority::Err),
            (b"FATAL crash", Priority::Err),
            (b"[ERROR] bad request", Priority::Err),
            (b"[Fatal] out of memory", Priority::Err),
            (b"WARN disk space low", Priority::Warning),
            (b"WARNING timeout", Priority::Warning),
            (b"[Warning] slow query", Priority::Warning),
            (b"CRITICAL failure", Priority::Crit),
            (b"[Critical] overload", Priority::Crit),
            (b"[Note] schema updated", Priority::Notice),
            (b"DEBUG tracing", Priority::Debug),
            (b"[Debug] variable dump", Priority::Debug),
            // The 30-character prefix tolerance
            (b"svc-a 2024-01-15 | ERROR boom", Priority::Err),
        ];

        for (line, want) in cases {
            let matched = cfg
                .priority_matchers
                .iter()
                .find(|m| m.regex.is_match(line))
                .unwrap_or_else(|| panic!("no matcher matched {:?}", String::from_utf8_lossy(line)));
            assert_eq!(matched.priority, *want, "line {:?}", String::from_utf8_lossy(line));
        }
    }

    #[test]
    fn test_matchers_ordered_emerg_to_debug() {
        let cfg = Config::parse(&opts(&[("priority-match-emerg", "^PANIC")])).expect("parse");
        let priorities: Vec<Priority> = cfg.priority_matchers.iter().map(|m| m.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
        assert_eq!(priorities[0], Priority::Emerg);
    }

    #[test]
    fn test_overrides() {
        let cfg = Config::parse(&opts(&[
            ("multiline-regex", r"^\t"),
            ("multiline-timeout", "50ms"),
            ("multiline-max-lines", "50"),
            ("multiline-max-bytes", "65536"),
            ("multiline-separator", " "),
            ("priority-prefix", "false"),
            ("priority-default-stdout", "debug"),
            ("priority-default-stderr", "warning"),
            ("priority-match-err", ""),
            ("priority-match-info", "^INFO"),
        ]))
        .expect("parse");

        assert!(cfg
            .multiline_regex
            .as_ref()
            .expect("regex")
            .is_match(b"\tcontinuation"));
        assert_eq!(cfg.multiline_timeout, Duration::from_millis(50));
        assert_eq!(cfg.multiline_max_lines, 50);
        assert_eq!(cfg.multiline_max_bytes, 65536);
        assert_eq!(cfg.multiline_separator, " ");
        assert!(!cfg.priority_prefix);
        assert_eq!(cfg.priority_default_stdout, Priority::Debug);
        assert_eq!(cfg.priority_default_stderr, Priority::Warning);

        // err disabled by the empty override, info added
        assert!(!cfg
            .priority_matchers
            .iter()
            .any(|m| m.priority == Priority::Err));
        assert!(cfg
            .priority_matchers
            .iter()
            .any(|m| m.priority == Priority::Info));
    }

    #[test]
    fn test_empty_multiline_regex_disables_merging() {
        let cfg = Config::parse(&opts(&[("multiline-regex", "")])).expect("parse");
        assert!(cfg.multiline_regex.is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Config::parse(&opts(&[("bogus", "value")])).expect_err("should fail");
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_field_extractor_keys_accepted() {
        let cfg = Config::parse(&opts(&[(
            "field-REQUEST_ID",
            "request_id=([a-z0-9]+)",
        )]))
        .expect("parse");
        assert_eq!(cfg.field_extractors.len(), 1);
        assert_eq!(cfg.field_extractors[0].name, "REQUEST_ID");
    }

    #[test]
    fn test_field_extractor_sanitizes_name() {
        let cfg =
            Config::parse(&opts(&[("field-trace.id", r"trace=(\w+)")])).expect("parse");
        assert_eq!(cfg.field_extractors[0].name, "TRACE_ID");
    }

    #[test]
    fn test_field_extractor_requires_capture_group() {
        let err = Config::parse(&opts(&[("field-REQUEST_ID", "request_id=[a-z0-9]+")]))
            .expect_err("should fail");
        assert!(err.to_string().contains("capture group"));
    }

    #[test]
    fn test_field_extractor_requires_name() {
        assert!(Config::parse(&opts(&[("field-", "(x)")])).is_err());
    }

    #[test]
    fn test_field_extractors_ordered_by_key() {
        let cfg = Config::parse(&opts(&[
            ("field-ZETA", "(z)"),
            ("field-ALPHA", "(a)"),
        ]))
        .expect("parse");
        let names: Vec<&str> = cfg.field_extractors.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["ALPHA", "ZETA"]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases: &[(&str, &str)] = &[
            ("multiline-regex", "[invalid"),
            ("multiline-timeout", "notaduration"),
            ("multiline-timeout", "0ms"),
            ("multiline-max-lines", "abc"),
            ("multiline-max-lines", "0"),
            ("multiline-max-bytes", "-1"),
            ("priority-default-stdout", "critical"),
            ("priority-prefix", "maybe"),
            ("priority-match-err", "[broken"),
            ("labels-regex", "[broken"),
            ("env-regex", "[broken"),
            ("strip-timestamp", "2"),
            ("parse-json", "yes"),
            ("strip-timestamp-regex", "[broken"),
        ];
        for (key, value) in cases {
            assert!(
                Config::parse(&opts(&[(key, value)])).is_err(),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_list_parsing_trims_elements() {
        let cfg = Config::parse(&opts(&[
            ("labels", "app, tier ,stage"),
            ("json-level-keys", "lvl, sev"),
        ]))
        .expect("parse");
        assert_eq!(cfg.labels, ["app", "tier", "stage"]);
        assert_eq!(cfg.json_level_keys, ["lvl", "sev"]);
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(
            parse_duration("t", "10ms").expect("parse"),
            Duration::from_millis(10)
        );
        assert_eq!(
            parse_duration("t", "1.5s").expect("parse"),
            Duration::from_millis(1500)
        );
        assert_eq!(
            parse_duration("t", "1m30s").expect("parse"),
            Duration::from_secs(90)
        );
        assert_eq!(
            parse_duration("t", "250us").expect("parse"),
            Duration::from_micros(250)
        );
        assert!(parse_duration("t", "5").is_err());
        assert!(parse_duration("t", "ms").is_err());
        assert!(parse_duration("t", "-5ms").is_err());
        assert!(parse_duration("t", "5 ms").is_err());
    }

    #[test]
    fn test_parse_bool_forms() {
        for v in ["true", "TRUE", "True", "1"] {
            assert!(parse_bool("k", v).expect("parse"));
        }
        for v in ["false", "FALSE", "0"] {
            assert!(!parse_bool("k", v).expect("parse"));
        }
        assert!(parse_bool("k", "yes").is_err());
        assert!(parse_bool("k", "").is_err());
    }
}
