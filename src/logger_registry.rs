//! Named, cached loggers with rotating file and console sinks
//!
//! A [`LoggerRegistry`] hands out one [`Logger`] per logical name. The first
//! request for a name creates the sinks; later requests return the cached
//! logger and only update its level. Sink options passed on a later request
//! are ignored: directory, file name, rotation and format are fixed once
//! the logger exists.

use crate::config::RegistryConfig;
use crate::errors::ErrorContext;
use crate::log_sink::{LogFormat, RecordFormat, Severity};
use crate::rotation::{RotatingFileSink, RotatingFileWriter};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{Dispatch, Metadata};
use tracing_subscriber::filter::DynFilterFn;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

/// Target of every event emitted through [`Logger::log`].
const EVENT_TARGET: &str = "pipeline_utils::logger";

/// Per-request logger options. Unset fields fall back to the registry's
/// [`RegistryConfig`].
#[derive(Debug, Clone, Default)]
pub struct LoggerOptions {
    pub log_dir: Option<PathBuf>,
    /// File name inside `log_dir`; defaults to `<name>.log`.
    pub log_file: Option<String>,
    pub level: Option<Severity>,
    pub max_bytes: Option<u64>,
    pub backup_count: Option<usize>,
    pub console: Option<bool>,
    pub json: Option<bool>,
}

impl LoggerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn log_file(mut self, file: impl Into<String>) -> Self {
        self.log_file = Some(file.into());
        self
    }

    pub fn level(mut self, level: Severity) -> Self {
        self.level = Some(level);
        self
    }

    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn backup_count(mut self, backup_count: usize) -> Self {
        self.backup_count = Some(backup_count);
        self
    }

    pub fn console(mut self, console: bool) -> Self {
        self.console = Some(console);
        self
    }

    pub fn json(mut self, json: bool) -> Self {
        self.json = Some(json);
        self
    }
}

struct LoggerInner {
    name: String,
    level: Arc<AtomicU8>,
    log_path: PathBuf,
    dispatch: Dispatch,
}

/// Handle to a configured logger. Clones share the same sinks and level.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    fn build(name: &str, options: &LoggerOptions, config: &RegistryConfig, level: Severity) -> io::Result<Self> {
        let log_dir = options.log_dir.clone().unwrap_or_else(|| config.log_dir.clone());
        fs::create_dir_all(&log_dir)?;

        let file_name = options
            .log_file
            .clone()
            .unwrap_or_else(|| format!("{name}.log"));
        let log_path = log_dir.join(file_name);

        let writer = RotatingFileWriter::open(
            &log_path,
            options.max_bytes.unwrap_or(config.max_bytes),
            options.backup_count.unwrap_or(config.backup_count),
        )?;
        let sink = RotatingFileSink::new(writer);

        let format = if options.json.unwrap_or(config.json) {
            LogFormat::Json
        } else {
            LogFormat::Plain
        };

        let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(sink)
                .event_format(RecordFormat::new(format))
                .boxed(),
        );
        if options.console.unwrap_or(config.console) {
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .event_format(RecordFormat::new(format))
                    .boxed(),
            );
        }

        let level_cell = Arc::new(AtomicU8::new(level as u8));
        let filter_level = Arc::clone(&level_cell);
        // Events from `Logger::log` are already level-checked; foreign events
        // routed through `dispatch()` are checked against the live level.
        let filter = DynFilterFn::new(move |meta: &Metadata<'_>, _cx: &Context<'_, Registry>| {
            meta.target() == EVENT_TARGET
                || Severity::from_tracing(meta.level())
                    >= Severity::from_u8(filter_level.load(Ordering::Relaxed))
        });

        let subscriber = tracing_subscriber::registry().with(layers.with_filter(filter));

        Ok(Logger {
            inner: Arc::new(LoggerInner {
                name: name.to_string(),
                level: level_cell,
                log_path,
                dispatch: Dispatch::new(subscriber),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn level(&self) -> Severity {
        Severity::from_u8(self.inner.level.load(Ordering::Relaxed))
    }

    /// Change the minimum severity; takes effect for the next record.
    pub fn set_level(&self, level: Severity) {
        self.inner.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn enabled(&self, level: Severity) -> bool {
        level >= self.level()
    }

    /// Path of the active log file.
    pub fn log_path(&self) -> &Path {
        &self.inner.log_path
    }

    /// True when both handles refer to the same registry entry.
    pub fn same_as(&self, other: &Logger) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The dispatcher backing this logger. Use it with
    /// `tracing::dispatcher::with_default` to send `tracing` events from
    /// other code to this logger's sinks.
    pub fn dispatch(&self) -> &Dispatch {
        &self.inner.dispatch
    }

    pub fn log(&self, level: Severity, message: impl fmt::Display) {
        if !self.enabled(level) {
            return;
        }

        let name = self.inner.name.as_str();
        let severity = level.as_str();
        tracing::dispatcher::with_default(&self.inner.dispatch, || match level {
            Severity::Debug => {
                tracing::debug!(target: EVENT_TARGET, logger = name, severity = severity, "{}", message)
            }
            Severity::Info => {
                tracing::info!(target: EVENT_TARGET, logger = name, severity = severity, "{}", message)
            }
            Severity::Warning => {
                tracing::warn!(target: EVENT_TARGET, logger = name, severity = severity, "{}", message)
            }
            Severity::Error | Severity::Critical => {
                tracing::error!(target: EVENT_TARGET, logger = name, severity = severity, "{}", message)
            }
        });
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(Severity::Debug, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(Severity::Info, message);
    }

    pub fn warning(&self, message: impl fmt::Display) {
        self.log(Severity::Warning, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(Severity::Error, message);
    }

    pub fn critical(&self, message: impl fmt::Display) {
        self.log(Severity::Critical, message);
    }

    /// Log `message` at ERROR with the full diagnostic text of `err`
    /// (origin, cause and trace).
    pub fn exception(&self, message: impl fmt::Display, err: &ErrorContext) {
        self.log(Severity::Error, format_args!("{message}\n{err}"));
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.inner.name)
            .field("level", &self.level())
            .field("log_path", &self.inner.log_path)
            .finish()
    }
}

/// Process-local cache of loggers keyed by name.
///
/// Pass one registry to every component that needs logging instead of
/// relying on a hidden global.
pub struct LoggerRegistry {
    config: RegistryConfig,
    loggers: Mutex<HashMap<String, Logger>>,
}

impl LoggerRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            loggers: Mutex::new(HashMap::new()),
        }
    }

    /// Registry configured from defaults and the `LOG_LEVEL` environment variable.
    pub fn from_env() -> Result<Self, figment::Error> {
        Ok(Self::new(RegistryConfig::from_env()?))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Logger>> {
        // The map is only ever inserted into; a poisoned guard still holds valid data.
        self.loggers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get or create the logger for `name` with default options.
    pub fn get(&self, name: &str) -> io::Result<Logger> {
        self.get_with(name, LoggerOptions::default())
    }

    /// Get or create the logger for `name`.
    ///
    /// On a cached name the resolved level is applied and every other option
    /// is ignored. Directory creation and file open errors are returned
    /// unwrapped.
    pub fn get_with(&self, name: &str, options: LoggerOptions) -> io::Result<Logger> {
        let level = options.level.unwrap_or_else(|| self.config.default_level());
        let mut entries = self.entries();

        if let Some(logger) = entries.get(name) {
            logger.set_level(level);
            return Ok(logger.clone());
        }

        let logger = Logger::build(name, &options, &self.config, level)?;
        entries.insert(name.to_string(), logger.clone());
        Ok(logger)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Names of every cached logger, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Built-in defaults plus `LOG_LEVEL`. A provider error leaves the built-in
/// defaults in place, so the level falls back to INFO.
impl Default for LoggerRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::from_env().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn quiet_registry(dir: &Path) -> LoggerRegistry {
        LoggerRegistry::new(
            RegistryConfig::default()
                .with_log_dir(dir)
                .with_console(false),
        )
    }

    #[test]
    fn test_cached_lookup_returns_same_logger() {
        let dir = tempdir().unwrap();
        let registry = quiet_registry(dir.path());

        let first = registry.get("x").unwrap();
        let second = registry.get("x").unwrap();

        assert!(first.same_as(&second));
        assert_eq!(registry.len(), 1);
        assert_eq!(first.log_path(), dir.path().join("x.log"));
    }

    #[test]
    fn test_message_written_once() {
        let dir = tempdir().unwrap();
        let registry = quiet_registry(dir.path());

        registry.get("x").unwrap();
        let logger = registry.get("x").unwrap();
        logger.info("hello once");

        let content = fs::read_to_string(logger.log_path()).unwrap();
        assert_eq!(content.matches("hello once").count(), 1);
        assert!(content.contains("| INFO | x | hello once"));
    }

    #[test]
    fn test_level_updates_on_cached_lookup() {
        let dir = tempdir().unwrap();
        let registry = quiet_registry(dir.path());

        let logger = registry
            .get_with("lvl", LoggerOptions::new().level(Severity::Error))
            .unwrap();
        logger.info("suppressed");
        assert_eq!(logger.level(), Severity::Error);

        registry
            .get_with("lvl", LoggerOptions::new().level(Severity::Debug))
            .unwrap();
        assert_eq!(logger.level(), Severity::Debug);
        logger.debug("visible");

        let content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(!content.contains("suppressed"));
        assert!(content.contains("| DEBUG | lvl | visible"));
    }

    #[test]
    fn test_cached_lookup_without_level_uses_config_default() {
        let dir = tempdir().unwrap();
        let registry = LoggerRegistry::new(
            RegistryConfig::default()
                .with_log_dir(dir.path())
                .with_console(false)
                .with_log_level("warning"),
        );

        let logger = registry
            .get_with("reset", LoggerOptions::new().level(Severity::Debug))
            .unwrap();
        assert_eq!(logger.level(), Severity::Debug);

        registry.get("reset").unwrap();
        assert_eq!(logger.level(), Severity::Warning);
    }

    #[test]
    fn test_sink_options_fixed_after_creation() {
        let dir = tempdir().unwrap();
        let registry = quiet_registry(dir.path());

        let logger = registry.get("fixed").unwrap();
        let again = registry
            .get_with(
                "fixed",
                LoggerOptions::new()
                    .log_dir(dir.path().join("elsewhere"))
                    .log_file("other.log")
                    .json(true),
            )
            .unwrap();

        assert!(logger.same_as(&again));
        assert_eq!(again.log_path(), dir.path().join("fixed.log"));
        assert!(!dir.path().join("elsewhere").exists());
    }

    #[test]
    fn test_creates_missing_log_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let registry = quiet_registry(dir.path());

        let logger = registry
            .get_with("nested", LoggerOptions::new().log_dir(&nested).log_file("run.log"))
            .unwrap();
        logger.warning("careful");

        assert!(nested.join("run.log").exists());
        let content = fs::read_to_string(nested.join("run.log")).unwrap();
        assert!(content.contains("| WARNING | nested | careful"));
    }

    #[test]
    fn test_directory_failure_is_native_io_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let registry = quiet_registry(dir.path());

        let result = registry.get_with("blocked", LoggerOptions::new().log_dir(blocker.join("logs")));
        assert!(result.is_err());
        assert!(!registry.contains("blocked"));
    }

    #[test]
    fn test_json_records() {
        let dir = tempdir().unwrap();
        let registry = quiet_registry(dir.path());

        let logger = registry
            .get_with("structured", LoggerOptions::new().json(true))
            .unwrap();
        logger.critical("disk full");

        let content = fs::read_to_string(logger.log_path()).unwrap();
        let line = content.lines().next().unwrap();
        let record: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(record["level"], "CRITICAL");
        assert_eq!(record["logger"], "structured");
        assert_eq!(record["message"], "disk full");
        assert!(record["timestamp"].is_string());
    }

    #[test]
    fn test_exception_includes_diagnostics() {
        let dir = tempdir().unwrap();
        let registry = quiet_registry(dir.path());
        let logger = registry.get("diag").unwrap();

        let err = ErrorContext::with_cause(
            "Error while loading",
            crate::errors::FileOpsError::not_found("model.bin"),
        );
        logger.exception("Failed to load", &err);

        let content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(content.contains("| ERROR | diag | Failed to load"));
        assert!(content.contains("File not found at model.bin"));
        assert!(content.contains("Trace:"));
    }

    #[test]
    fn test_dispatch_routes_foreign_events_with_level() {
        let dir = tempdir().unwrap();
        let registry = quiet_registry(dir.path());
        let logger = registry
            .get_with("routed", LoggerOptions::new().level(Severity::Warning))
            .unwrap();

        tracing::dispatcher::with_default(logger.dispatch(), || {
            tracing::info!("dropped by level");
            tracing::warn!(epoch = 3, "validation loss rising");
        });

        let content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(!content.contains("dropped by level"));
        assert!(content.contains("| WARNING |"));
        assert!(content.contains("validation loss rising epoch=3"));
    }

    #[test]
    fn test_names_are_sorted() {
        let dir = tempdir().unwrap();
        let registry = quiet_registry(dir.path());
        registry.get("b").unwrap();
        registry.get("a").unwrap();

        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_default_registry_reads_log_level_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LOG_LEVEL", "DEBUG");
            assert_eq!(LoggerRegistry::default().config().default_level(), Severity::Debug);

            jail.set_env("LOG_LEVEL", "20");
            assert_eq!(LoggerRegistry::default().config().default_level(), Severity::Info);

            jail.set_env("LOG_LEVEL", "[1, 2]");
            assert_eq!(LoggerRegistry::default().config().default_level(), Severity::Info);
            Ok(())
        });
    }
}
