//! Formatter collaborator contract (§6) and the default Logstash-compatible
//! implementation that ships as part of the ambient stack (§10).
//!
//! The host logging framework and the exact shape of its "record" type are out
//! of scope (§1) - this module only defines the minimal [`LogRecord`] surface
//! the default formatter needs, and the [`Formatter`] trait a host can implement
//! against its own richer record type instead.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Fields internal to a host log record that are never copied onto the
/// top-level Logstash message, per the wire format contract (§6).
pub const RECORD_FIELD_SKIP_LIST: &[&str] = &[
    "args",
    "asctime",
    "created",
    "exc_info",
    "exc_text",
    "filename",
    "funcName",
    "id",
    "levelname",
    "levelno",
    "lineno",
    "module",
    "msecs",
    "message",
    "msg",
    "name",
    "pathname",
    "process",
    "processName",
    "relativeCreated",
    "stack_info",
    "thread",
    "threadName",
];

/// A minimal, host-agnostic view of a log record: a level, a rendered message,
/// and an open bag of extra fields the host attached (MDC-style). Hosts with a
/// richer record type implement [`Formatter`] directly against their own type
/// rather than going through this struct.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Severity level (e.g. `"INFO"`, `"ERROR"`).
    pub level: String,
    /// Rendered human-readable message.
    pub message: String,
    /// Additional fields the host wants merged into the event, excluding anything
    /// in [`RECORD_FIELD_SKIP_LIST`].
    pub extra: BTreeMap<String, Value>,
    /// Record timestamp; defaults to "now" if the host doesn't supply one.
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    /// Construct a record with no extra fields, timestamped at the call site.
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            message: message.into(),
            extra: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Formatter collaborator contract (§6): turn an opaque host record into bytes.
/// Out of scope for the core pipeline, but the crate still defines the seam and
/// ships one implementation so the handler is usable standalone.
pub trait Formatter: Send + Sync {
    /// Render `record` to bytes, not yet including the handler's terminator.
    fn format(&self, record: &LogRecord) -> Result<Vec<u8>, String>;
}

/// Logstash-compatible JSON formatter (§6): produces an object with the
/// well-known top-level fields plus any host-supplied extras merged as siblings.
#[derive(Debug, Clone)]
pub struct LogstashFormatter {
    host: String,
    program: String,
    pid: u32,
    tags: Vec<String>,
    logsource: String,
}

impl LogstashFormatter {
    /// Build a formatter stamping every event with the given `program` name and
    /// `tags`; `host`/`logsource` default to the local hostname, `pid` to the
    /// current process id.
    pub fn new(program: impl Into<String>, tags: Vec<String>) -> Self {
        let host = hostname();
        Self {
            logsource: host.clone(),
            host,
            program: program.into(),
            pid: std::process::id(),
            tags,
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[derive(Serialize)]
struct LogstashMessage<'a> {
    #[serde(rename = "@timestamp")]
    timestamp: String,
    #[serde(rename = "@version")]
    version: u8,
    host: &'a str,
    level: &'a str,
    logsource: &'a str,
    message: &'a str,
    pid: u32,
    program: &'a str,
    #[serde(rename = "type")]
    event_type: &'static str,
    tags: &'a [String],
}

impl Formatter for LogstashFormatter {
    fn format(&self, record: &LogRecord) -> Result<Vec<u8>, String> {
        let base = LogstashMessage {
            timestamp: record.timestamp.to_rfc3339(),
            version: 1,
            host: &self.host,
            level: &record.level,
            logsource: &self.logsource,
            message: &record.message,
            pid: self.pid,
            program: &self.program,
            event_type: "eventlog",
            tags: &self.tags,
        };

        let mut value = serde_json::to_value(&base).map_err(|e| e.to_string())?;
        let object = value.as_object_mut().ok_or("formatter must produce an object")?;
        for (key, extra_value) in &record.extra {
            if RECORD_FIELD_SKIP_LIST.contains(&key.as_str()) {
                continue;
            }
            object.insert(key.clone(), extra_value.clone());
        }

        serde_json::to_vec(&value).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_well_known_fields_and_merges_extras() {
        let formatter = LogstashFormatter::new("eventlog-test", vec!["svc".to_string()]);
        let mut record = LogRecord::new("INFO", "hello world");
        record
            .extra
            .insert("request_id".to_string(), Value::String("abc123".to_string()));
        record
            .extra
            .insert("lineno".to_string(), Value::Number(42.into()));

        let bytes = formatter.format(&record).expect("format succeeds");
        let parsed: Value = serde_json::from_slice(&bytes).expect("valid JSON");

        assert_eq!(parsed["message"], "hello world");
        assert_eq!(parsed["level"], "INFO");
        assert_eq!(parsed["program"], "eventlog-test");
        assert_eq!(parsed["@version"], 1);
        assert_eq!(parsed["request_id"], "abc123");
        // skip-listed field must not appear even though it was in `extra`
        assert!(parsed.get("lineno").is_none());
    }
}
