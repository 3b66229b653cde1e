// log_sink.rs
// Purpose: Severity levels and record formatting shared by every logger sink

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Field carrying the logical logger name on every emitted event.
pub const LOGGER_FIELD: &str = "logger";
/// Field carrying the severity name, so CRITICAL survives the mapping onto
/// `tracing::Level::ERROR`.
pub const SEVERITY_FIELD: &str = "severity";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Severity classifies log output, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Severity {
    Debug = 10,
    Info = 20,
    Warning = 30,
    Error = 40,
    Critical = 50,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseSeverityError(pub String);

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Parse a level name, falling back to INFO for anything unrecognised.
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or(Severity::Info)
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0..=10 => Severity::Debug,
            11..=20 => Severity::Info,
            21..=30 => Severity::Warning,
            31..=40 => Severity::Error,
            _ => Severity::Critical,
        }
    }

    /// Map a `tracing` level onto the closest severity.
    pub fn from_tracing(level: &Level) -> Self {
        match *level {
            Level::TRACE | Level::DEBUG => Severity::Debug,
            Level::INFO => Severity::Info,
            Level::WARN => Severity::Warning,
            Level::ERROR => Severity::Error,
        }
    }
}

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "DEBUG" | "10" => Ok(Severity::Debug),
            "INFO" | "20" => Ok(Severity::Info),
            "WARNING" | "WARN" | "30" => Ok(Severity::Warning),
            "ERROR" | "40" => Ok(Severity::Error),
            "CRITICAL" | "FATAL" | "50" => Ok(Severity::Critical),
            _ => Err(ParseSeverityError(trimmed.to_string())),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output rendering for a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// `<timestamp> | <LEVEL> | <logger> | <message>`
    #[default]
    Plain,
    /// One JSON object per line.
    Json,
}

/// Collects the fields of a single event.
#[derive(Default)]
struct RecordVisitor {
    message: String,
    logger: Option<String>,
    severity: Option<String>,
    fields: Map<String, Value>,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            LOGGER_FIELD => self.logger = Some(value.to_string()),
            SEVERITY_FIELD => self.severity = Some(value.to_string()),
            name => {
                self.fields.insert(name.to_string(), Value::from(value));
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{value:?}");
        match field.name() {
            "message" => self.message = rendered,
            LOGGER_FIELD => self.logger = Some(rendered),
            SEVERITY_FIELD => self.severity = Some(rendered),
            name => {
                self.fields.insert(name.to_string(), Value::from(rendered));
            }
        }
    }
}

/// Event formatter used by every file and console sink.
#[derive(Debug, Clone, Copy)]
pub struct RecordFormat {
    format: LogFormat,
}

impl RecordFormat {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }
}

impl<S, N> FormatEvent<S, N> for RecordFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let level = visitor
            .severity
            .take()
            .unwrap_or_else(|| Severity::from_tracing(meta.level()).as_str().to_string());
        let logger = visitor
            .logger
            .take()
            .unwrap_or_else(|| meta.target().to_string());
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();

        match self.format {
            LogFormat::Plain => {
                write!(writer, "{timestamp} | {level} | {logger} | {}", visitor.message)?;
                for (key, value) in &visitor.fields {
                    match value {
                        Value::String(s) => write!(writer, " {key}={s}")?,
                        other => write!(writer, " {key}={other}")?,
                    }
                }
                writeln!(writer)
            }
            LogFormat::Json => {
                let mut record = Map::new();
                record.insert("timestamp".into(), Value::from(timestamp));
                record.insert("level".into(), Value::from(level));
                record.insert("logger".into(), Value::from(logger));
                record.insert("message".into(), Value::from(visitor.message));
                for (key, value) in visitor.fields {
                    record.entry(key).or_insert(value);
                }
                writeln!(writer, "{}", Value::Object(record))
            }
        }
    }
}
