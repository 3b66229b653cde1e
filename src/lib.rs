//! Library root for the `pipeline_utils` crate
//! Shared error, logging and artifact I/O helpers for ML pipeline stages

// Core error handling
pub mod errors;

// Logging
pub mod config;
pub mod log_sink;
pub mod logger_registry;
pub mod rotation;

// Artifact I/O
pub mod file_ops;
pub mod npy;
pub mod serialization;

pub use config::RegistryConfig;
pub use errors::{ContextResult, ErrorContext, ErrorKind, ErrorRecord, FileOpsError, SourceLine};
pub use file_ops::{DirectoryList, FileOps};
pub use log_sink::{LogFormat, Severity};
pub use logger_registry::{Logger, LoggerOptions, LoggerRegistry};
pub use npy::NpyElement;
pub use serialization::Strategy;
