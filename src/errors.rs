//! Error handling for the pipeline utilities
//!
//! Lower-level failures are described by [`FileOpsError`]. At the public
//! boundary every failure is wrapped into an [`ErrorContext`], which keeps
//! the native error as its cause and records where the failure was caught.

use serde::{Serialize, Serializer};
use std::error::Error as StdError;
use std::fmt;
use std::panic::Location;
use thiserror::Error;

/// Sentinel used when no origin information is available.
pub const UNKNOWN: &str = "Unknown";

/// Boxed native error carried as the cause of an [`ErrorContext`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Native failures raised by the file helpers before they are wrapped.
#[derive(Error, Debug)]
pub enum FileOpsError {
    #[error("File not found at {path}")]
    NotFound { path: String },

    #[error("Document is empty: {path}")]
    EmptyContent { path: String },

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("I/O operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML operation failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{strategy} serialization failed: {message}")]
    Strategy {
        strategy: &'static str,
        message: String,
    },

    #[error("All serialization strategies failed: {}", render_failures(.failures))]
    AllStrategiesFailed { failures: Vec<FileOpsError> },

    #[error("Invalid array file: {message}")]
    InvalidArray { message: String },
}

fn render_failures(failures: &[FileOpsError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl FileOpsError {
    /// Create a not-found error for a path
    pub fn not_found(path: impl fmt::Display) -> Self {
        Self::NotFound {
            path: path.to_string(),
        }
    }

    /// Create an empty-content error for a path
    pub fn empty(path: impl fmt::Display) -> Self {
        Self::EmptyContent {
            path: path.to_string(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn strategy(strategy: &'static str, message: impl fmt::Display) -> Self {
        Self::Strategy {
            strategy,
            message: message.to_string(),
        }
    }

    pub fn invalid_array(message: impl Into<String>) -> Self {
        Self::InvalidArray {
            message: message.into(),
        }
    }
}

/// Coarse classification of the cause carried by an [`ErrorContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    EmptyContent,
    TypeMismatch,
    Serialization,
    Io,
    Other,
    /// The context carries no cause at all.
    None,
}

/// Line number of an error origin, or the `Unknown` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLine {
    Known(u32),
    Unknown,
}

impl fmt::Display for SourceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLine::Known(line) => write!(f, "{line}"),
            SourceLine::Unknown => f.write_str(UNKNOWN),
        }
    }
}

impl Serialize for SourceLine {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SourceLine::Known(line) => serializer.serialize_u32(*line),
            SourceLine::Unknown => serializer.serialize_str(UNKNOWN),
        }
    }
}

/// Machine-readable form of an [`ErrorContext`], e.g. for an API response
/// or a monitoring event.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub file: String,
    pub line: SourceLine,
    pub original_error: Option<String>,
}

/// Error wrapper that enriches a failure with where it was caught and the
/// full chain of causes behind it.
///
/// Constructed once at the point an operation fails and never modified.
/// Construction cannot fail.
pub struct ErrorContext {
    message: String,
    cause: Option<BoxError>,
    source_file: String,
    source_line: SourceLine,
    trace_text: Option<String>,
}

pub type ContextResult<T> = Result<T, ErrorContext>;

impl ErrorContext {
    /// Create a context with no underlying cause. Origin fields are `Unknown`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
            source_file: UNKNOWN.to_string(),
            source_line: SourceLine::Unknown,
            trace_text: None,
        }
    }

    /// Wrap `cause`, recording the caller's location as the origin.
    #[track_caller]
    pub fn with_cause<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::at(Location::caller(), message, cause.into())
    }

    /// Wrap `cause` with an explicit origin location.
    pub fn at(location: &Location<'_>, message: impl Into<String>, cause: BoxError) -> Self {
        let trace_text = render_trace(&*cause);
        Self {
            message: message.into(),
            source_file: location.file().to_string(),
            source_line: SourceLine::Known(location.line()),
            trace_text: Some(trace_text),
            cause: Some(cause),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn source_line(&self) -> SourceLine {
        self.source_line
    }

    /// The rendered cause chain, present only when a cause was supplied.
    pub fn trace_text(&self) -> Option<&str> {
        self.trace_text.as_deref()
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Downcast the direct cause to a concrete error type.
    pub fn cause_as<E: StdError + 'static>(&self) -> Option<&E> {
        self.cause.as_deref().and_then(|c| c.downcast_ref::<E>())
    }

    /// Classify the direct cause.
    pub fn kind(&self) -> ErrorKind {
        let Some(cause) = self.cause.as_deref() else {
            return ErrorKind::None;
        };

        if let Some(err) = cause.downcast_ref::<FileOpsError>() {
            return match err {
                FileOpsError::NotFound { .. } => ErrorKind::NotFound,
                FileOpsError::EmptyContent { .. } => ErrorKind::EmptyContent,
                FileOpsError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
                FileOpsError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                    ErrorKind::NotFound
                }
                FileOpsError::Io { .. } => ErrorKind::Io,
                FileOpsError::Yaml(_)
                | FileOpsError::Strategy { .. }
                | FileOpsError::AllStrategiesFailed { .. }
                | FileOpsError::InvalidArray { .. } => ErrorKind::Serialization,
            };
        }

        match cause.downcast_ref::<std::io::Error>() {
            Some(io) if io.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Some(_) => ErrorKind::Io,
            None => ErrorKind::Other,
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            message: self.message.clone(),
            file: self.source_file.clone(),
            line: self.source_line,
            original_error: self.cause.as_ref().map(ToString::to_string),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        // ErrorRecord only holds strings and integers, serialization cannot fail
        serde_json::to_value(self.to_record()).unwrap_or(serde_json::Value::Null)
    }
}

/// Render the cause chain, innermost error last.
fn render_trace(cause: &(dyn StdError + 'static)) -> String {
    let mut lines = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(cause);
    let mut depth = 0usize;

    while let Some(err) = current {
        lines.push(format!("  {depth}: {err}"));
        current = err.source();
        depth += 1;
    }

    lines.join("\n")
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error in file [{}] at line [{}]: {}",
            self.source_file, self.source_line, self.message
        )?;

        if let Some(cause) = &self.cause {
            write!(f, "\nCaused by: {cause}")?;
        }
        if let Some(trace) = &self.trace_text {
            write!(f, "\nTrace:\n{trace}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorContext")
            .field("message", &self.message)
            .field("source_file", &self.source_file)
            .field("source_line", &self.source_line)
            .field("cause", &self.cause)
            .finish()
    }
}

impl StdError for ErrorContext {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_without_cause_is_unknown() {
        let err = ErrorContext::new("plain failure");

        assert_eq!(err.source_file(), "Unknown");
        assert_eq!(err.source_line(), SourceLine::Unknown);
        assert!(err.trace_text().is_none());
        assert!(err.cause().is_none());
        assert_eq!(err.kind(), ErrorKind::None);
        assert_eq!(
            err.to_string(),
            "Error in file [Unknown] at line [Unknown]: plain failure"
        );
    }

    #[test]
    fn test_context_records_origin() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let line = line!() + 1;
        let err = ErrorContext::with_cause("reading config", io_err);

        assert!(err.source_file().ends_with("errors.rs"));
        assert_eq!(err.source_line(), SourceLine::Known(line));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_trace_walks_the_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ErrorContext::with_cause("writing", FileOpsError::io("opening file", io_err));

        let trace = err.trace_text().unwrap();
        assert!(trace.contains("0: I/O operation failed: opening file"));
        assert!(trace.contains("1: denied"));
        assert_eq!(err.kind(), ErrorKind::Io);

        let rendered = err.to_string();
        assert!(rendered.contains("Caused by: I/O operation failed"));
        assert!(rendered.contains("Trace:"));
    }

    #[test]
    fn test_error_chaining() {
        let err = ErrorContext::with_cause("loading", FileOpsError::not_found("a.yaml"));

        assert!(err.source().is_some());
        assert!(err.cause_as::<FileOpsError>().is_some());
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_record_form() {
        let err = ErrorContext::new("no cause");
        let json = err.to_json();
        assert_eq!(json["line"], "Unknown");
        assert_eq!(json["file"], "Unknown");
        assert!(json["original_error"].is_null());

        let err = ErrorContext::with_cause("with cause", FileOpsError::empty("b.yaml"));
        let json = err.to_json();
        assert!(json["line"].is_u64());
        assert_eq!(json["original_error"], "Document is empty: b.yaml");
        assert_eq!(json["message"], "with cause");
    }

    #[test]
    fn test_all_strategies_failed_lists_each_attempt() {
        let err = FileOpsError::AllStrategiesFailed {
            failures: vec![
                FileOpsError::strategy("bincode", "unexpected end"),
                FileOpsError::strategy("json", "expected value"),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("bincode serialization failed: unexpected end"));
        assert!(text.contains("json serialization failed: expected value"));
    }
}
