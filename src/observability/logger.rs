//! Structured JSON logger.
//!
//! One log line = one event. Output is synchronous and unbuffered; keys are
//! emitted in a deterministic order (event, severity, timestamp, then fields
//! in the order the caller supplied them) so log output is diffable in tests.

use std::fmt;
use std::io::{self, Write};

use chrono::Utc;

/// Log severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace,
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Synchronous structured logger. Errors and warnings go to stderr, the rest
/// to stdout.
pub struct Logger;

impl Logger {
    /// Logs an event with the given severity and key/value fields.
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        let line = Self::format_line(severity, event, fields);
        if severity >= Severity::Warn {
            let _ = writeln!(io::stderr(), "{}", line);
        } else {
            let _ = writeln!(io::stdout(), "{}", line);
        }
    }

    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }

    fn format_line(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(128);
        out.push('{');
        push_pair(&mut out, "event", event);
        out.push(',');
        push_pair(&mut out, "severity", severity.as_str());
        out.push(',');
        push_pair(&mut out, "ts", &Utc::now().to_rfc3339());
        for (key, value) in fields {
            out.push(',');
            push_pair(&mut out, key, value);
        }
        out.push('}');
        out
    }
}

fn push_pair(out: &mut String, key: &str, value: &str) {
    push_json_string(out, key);
    out.push(':');
    push_json_string(out, value);
}

fn push_json_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_escapes_quotes_and_newlines() {
        let line = Logger::format_line(Severity::Info, "save", &[("note", "a\"b\nc")]);
        assert!(line.contains("\\\""));
        assert!(line.contains("\\n"));
        assert!(line.starts_with("{\"event\":\"save\""));
    }

    #[test]
    fn severity_ordering_routes_warnings_to_stderr() {
        assert!(Severity::Warn >= Severity::Warn);
        assert!(Severity::Error > Severity::Info);
    }
}
