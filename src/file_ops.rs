//! File helpers for pipeline artifacts: YAML documents, serialized objects,
//! `.npy` arrays and directories.
//!
//! Every operation logs an INFO record on success. On failure it logs an
//! ERROR record with the full diagnostic text and returns an
//! [`ErrorContext`] carrying the native error as its cause.

use crate::errors::{ContextResult, ErrorContext, FileOpsError};
use crate::logger_registry::{Logger, LoggerOptions, LoggerRegistry};
use crate::log_sink::Severity;
use crate::npy::{self, NpyElement};
use crate::serialization::{self, Strategy};
use ndarray::{ArrayBase, ArrayD, Data, Dimension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::panic::Location;
use std::path::{Path, PathBuf};

/// Logger name used by [`FileOps::new`].
pub const LOGGER_NAME: &str = "pipeline_utils.file_ops";

/// One directory path or an ordered list of them.
pub trait DirectoryList {
    fn into_paths(self) -> Vec<PathBuf>;
}

impl DirectoryList for &str {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![PathBuf::from(self)]
    }
}

impl DirectoryList for String {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![PathBuf::from(self)]
    }
}

impl DirectoryList for &Path {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![self.to_path_buf()]
    }
}

impl DirectoryList for PathBuf {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![self]
    }
}

impl DirectoryList for &PathBuf {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![self.clone()]
    }
}

impl<P: AsRef<Path>> DirectoryList for Vec<P> {
    fn into_paths(self) -> Vec<PathBuf> {
        self.iter().map(|p| p.as_ref().to_path_buf()).collect()
    }
}

impl<P: AsRef<Path>> DirectoryList for &[P] {
    fn into_paths(self) -> Vec<PathBuf> {
        self.iter().map(|p| p.as_ref().to_path_buf()).collect()
    }
}

impl<P: AsRef<Path>, const N: usize> DirectoryList for [P; N] {
    fn into_paths(self) -> Vec<PathBuf> {
        self.iter().map(|p| p.as_ref().to_path_buf()).collect()
    }
}

fn ensure_parent(path: &Path) -> Result<(), FileOpsError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| FileOpsError::io("creating parent directory", e))
        }
        _ => Ok(()),
    }
}

fn require_exists(path: &Path) -> Result<(), FileOpsError> {
    if path.exists() {
        Ok(())
    } else {
        Err(FileOpsError::not_found(path.display()))
    }
}

fn read_yaml_file<T: DeserializeOwned>(path: &Path) -> Result<T, FileOpsError> {
    require_exists(path)?;
    let content = fs::read_to_string(path).map_err(|e| FileOpsError::io("reading YAML file", e))?;
    let document: serde_yaml::Value = if content.trim().is_empty() {
        serde_yaml::Value::Null
    } else {
        serde_yaml::from_str(&content)?
    };
    if document.is_null() {
        return Err(FileOpsError::empty(path.display()));
    }
    Ok(serde_yaml::from_value::<T>(document)?)
}

fn write_yaml_file<T: Serialize + ?Sized>(
    path: &Path,
    data: &T,
    create_dir: bool,
) -> Result<(), FileOpsError> {
    if create_dir {
        ensure_parent(path)?;
    }
    let text = serde_yaml::to_string(data)?;
    fs::write(path, text).map_err(|e| FileOpsError::io("writing YAML file", e))
}

fn load_object_file<T: DeserializeOwned>(
    path: &Path,
    strategies: &[Strategy],
) -> Result<serialization::Attempt<T>, FileOpsError> {
    require_exists(path)?;
    let bytes = fs::read(path).map_err(|e| FileOpsError::io("reading object file", e))?;
    serialization::decode_first::<T>(strategies, &bytes)
}

fn save_object_file<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    strategies: &[Strategy],
    create_dir: bool,
) -> Result<serialization::Attempt<Vec<u8>>, FileOpsError> {
    if create_dir {
        ensure_parent(path)?;
    }
    let attempt = serialization::encode_first(strategies, value)?;
    fs::write(path, &attempt.value).map_err(|e| FileOpsError::io("writing object file", e))?;
    Ok(attempt)
}

fn save_array_file<T, S, D>(
    path: &Path,
    array: &ArrayBase<S, D>,
    create_dir: bool,
) -> Result<(), FileOpsError>
where
    T: NpyElement,
    S: Data<Elem = T>,
    D: Dimension,
{
    if create_dir {
        ensure_parent(path)?;
    }
    fs::write(path, npy::encode(array)).map_err(|e| FileOpsError::io("writing array file", e))
}

fn load_array_file<T: NpyElement>(path: &Path) -> Result<ArrayD<T>, FileOpsError> {
    require_exists(path)?;
    let bytes = fs::read(path).map_err(|e| FileOpsError::io("reading array file", e))?;
    npy::decode::<T>(&bytes)
}

fn create_directory(path: &Path, exist_ok: bool) -> Result<(), FileOpsError> {
    let context = || format!("creating directory {}", path.display());
    if exist_ok {
        return fs::create_dir_all(path).map_err(|e| FileOpsError::io(context(), e));
    }
    ensure_parent(path)?;
    fs::create_dir(path).map_err(|e| FileOpsError::io(context(), e))
}

/// Artifact I/O helpers bound to a logger.
#[derive(Debug, Clone)]
pub struct FileOps {
    logger: Logger,
    strategies: Vec<Strategy>,
}

impl FileOps {
    /// Use the registry's `pipeline_utils.file_ops` logger at DEBUG level.
    pub fn new(registry: &LoggerRegistry) -> io::Result<Self> {
        let logger = registry.get_with(LOGGER_NAME, LoggerOptions::new().level(Severity::Debug))?;
        Ok(Self::with_logger(logger))
    }

    pub fn with_logger(logger: Logger) -> Self {
        Self {
            logger,
            strategies: serialization::default_strategies(),
        }
    }

    /// Replace the ordered list of object serialization strategies.
    pub fn with_strategies(mut self, strategies: Vec<Strategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Wrap a failed operation, log it and hand the context back. The origin
    /// is the public operation that called this.
    #[track_caller]
    fn fail(&self, log_message: &str, message: &str, cause: FileOpsError) -> ErrorContext {
        let err = ErrorContext::at(Location::caller(), message, Box::new(cause));
        self.logger.exception(log_message, &err);
        err
    }

    /// Parse a YAML document. Fails when the file is missing or the document
    /// is empty.
    #[track_caller]
    pub fn read_yaml<T: DeserializeOwned>(&self, path: impl AsRef<Path>) -> ContextResult<T> {
        let path = path.as_ref();
        match read_yaml_file::<T>(path) {
            Ok(value) => {
                self.logger
                    .info(format_args!("YAML file loaded successfully: {}", path.display()));
                Ok(value)
            }
            Err(e) => Err(self.fail("Failed to read YAML file", "Error while reading YAML file", e)),
        }
    }

    /// Write `data` as YAML, keeping field and key order.
    #[track_caller]
    pub fn write_yaml<T: Serialize + ?Sized>(
        &self,
        path: impl AsRef<Path>,
        data: &T,
        create_dir: bool,
    ) -> ContextResult<()> {
        let path = path.as_ref();
        match write_yaml_file(path, data, create_dir) {
            Ok(()) => {
                self.logger
                    .info(format_args!("YAML file written successfully at: {}", path.display()));
                Ok(())
            }
            Err(e) => Err(self.fail("Failed to write YAML file", "Error while writing YAML file", e)),
        }
    }

    /// Deserialize an object, trying each strategy in order.
    #[track_caller]
    pub fn load_object<T: DeserializeOwned>(&self, path: impl AsRef<Path>) -> ContextResult<T> {
        let path = path.as_ref();
        match load_object_file::<T>(path, &self.strategies) {
            Ok(attempt) => {
                for failure in &attempt.failures {
                    self.logger.warning(format_args!("Object load attempt failed: {failure}"));
                }
                if !attempt.failures.is_empty() {
                    self.logger.warning(format_args!(
                        "Primary load strategy failed, fell back to {}",
                        attempt.strategy
                    ));
                }
                self.logger
                    .info(format_args!("Object loaded using {}", attempt.strategy));
                Ok(attempt.value)
            }
            Err(e) => Err(self.fail("Failed to load object", "Error while loading object", e)),
        }
    }

    /// Serialize an object with the first strategy that succeeds.
    #[track_caller]
    pub fn save_object<T: Serialize + ?Sized>(
        &self,
        path: impl AsRef<Path>,
        value: &T,
        create_dir: bool,
    ) -> ContextResult<()> {
        let path = path.as_ref();
        match save_object_file(path, value, &self.strategies, create_dir) {
            Ok(attempt) => {
                for failure in &attempt.failures {
                    self.logger.warning(format_args!("Object save attempt failed: {failure}"));
                }
                if !attempt.failures.is_empty() {
                    self.logger.warning(format_args!(
                        "Primary save strategy failed, fell back to {}",
                        attempt.strategy
                    ));
                }
                self.logger
                    .info(format_args!("Object saved using {}", attempt.strategy));
                Ok(())
            }
            Err(e) => Err(self.fail("Failed to save object", "Error while saving object", e)),
        }
    }

    /// Write a numeric array as an `.npy` file.
    #[track_caller]
    pub fn save_array<T, S, D>(
        &self,
        path: impl AsRef<Path>,
        array: &ArrayBase<S, D>,
        create_dir: bool,
    ) -> ContextResult<()>
    where
        T: NpyElement,
        S: Data<Elem = T>,
        D: Dimension,
    {
        let path = path.as_ref();
        match save_array_file(path, array, create_dir) {
            Ok(()) => {
                self.logger
                    .info(format_args!("Numpy array saved successfully at: {}", path.display()));
                Ok(())
            }
            Err(e) => Err(self.fail("Failed to save numpy array", "Error while saving numpy array", e)),
        }
    }

    /// Load an `.npy` file whose element type must be `T`.
    #[track_caller]
    pub fn load_array<T: NpyElement>(&self, path: impl AsRef<Path>) -> ContextResult<ArrayD<T>> {
        let path = path.as_ref();
        match load_array_file::<T>(path) {
            Ok(array) => {
                self.logger
                    .info(format_args!("Numpy array loaded successfully from: {}", path.display()));
                Ok(array)
            }
            Err(e) => Err(self.fail("Failed to load numpy array", "Error while loading numpy array", e)),
        }
    }

    /// Create one or more directories, parents included. With `exist_ok`
    /// false an existing directory is an error.
    #[track_caller]
    pub fn create_directories(&self, paths: impl DirectoryList, exist_ok: bool) -> ContextResult<()> {
        for path in paths.into_paths() {
            match create_directory(&path, exist_ok) {
                Ok(()) => self.logger.info(format_args!(
                    "Directory created or already exists: {}",
                    path.display()
                )),
                Err(cause) => {
                    return Err(self.fail(
                        "Failed to create directories",
                        "Error while creating directories",
                        cause,
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::errors::{ErrorKind, SourceLine};
    use tempfile::tempdir;

    fn file_ops(dir: &Path) -> FileOps {
        let registry = LoggerRegistry::new(
            RegistryConfig::default()
                .with_log_dir(dir.join("logs"))
                .with_console(false),
        );
        FileOps::new(&registry).unwrap()
    }

    #[test]
    fn test_uses_debug_logger() {
        let dir = tempdir().unwrap();
        let ops = file_ops(dir.path());
        assert_eq!(ops.logger().name(), LOGGER_NAME);
        assert_eq!(ops.logger().level(), Severity::Debug);
        assert_eq!(ops.strategies(), &[Strategy::Bincode, Strategy::Json]);
    }

    #[test]
    fn test_error_origin_points_at_caller() {
        let dir = tempdir().unwrap();
        let ops = file_ops(dir.path());

        let line = line!() + 1;
        let err = ops.read_yaml::<serde_yaml::Value>(dir.path().join("nope.yaml")).unwrap_err();

        assert!(err.source_file().ends_with("file_ops.rs"));
        assert_eq!(err.source_line(), SourceLine::Known(line));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_failure_is_logged_with_diagnostics() {
        let dir = tempdir().unwrap();
        let ops = file_ops(dir.path());

        let _ = ops.load_array::<f64>(dir.path().join("missing.npy"));

        let log = fs::read_to_string(ops.logger().log_path()).unwrap();
        assert!(log.contains("| ERROR | pipeline_utils.file_ops | Failed to load numpy array"));
        assert!(log.contains("Error while loading numpy array"));
        assert!(log.contains("File not found at"));
    }

    #[test]
    fn test_whitespace_only_yaml_is_empty() {
        let dir = tempdir().unwrap();
        let ops = file_ops(dir.path());
        let path = dir.path().join("blank.yaml");
        fs::write(&path, "   \n\n").unwrap();

        let err = ops.read_yaml::<serde_yaml::Mapping>(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyContent);
        assert_eq!(err.message(), "Error while reading YAML file");
    }

    #[test]
    fn test_without_create_dir_missing_parent_fails() {
        let dir = tempdir().unwrap();
        let ops = file_ops(dir.path());

        let err = ops
            .save_object(dir.path().join("absent").join("obj.bin"), &42u32, false)
            .unwrap_err();
        assert_eq!(err.message(), "Error while saving object");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_parent_failure_keeps_native_io_error() {
        let dir = tempdir().unwrap();
        let ops = file_ops(dir.path());
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let err = ops
            .create_directories(blocker.join("child").join("leaf"), false)
            .unwrap_err();

        assert_eq!(err.message(), "Error while creating directories");
        match err.cause_as::<FileOpsError>() {
            Some(FileOpsError::Io { operation, source }) => {
                assert_eq!(operation, "creating parent directory");
                assert_ne!(source.kind(), io::ErrorKind::Other);
            }
            other => panic!("expected an I/O cause, got {other:?}"),
        }
        assert_eq!(
            err.cause().unwrap().to_string(),
            "I/O operation failed: creating parent directory"
        );
    }

    #[test]
    fn test_directory_list_forms() {
        assert_eq!("a".into_paths(), vec![PathBuf::from("a")]);
        assert_eq!(vec!["a", "b"].into_paths().len(), 2);
        assert_eq!(["x", "y", "z"].into_paths()[2], PathBuf::from("z"));
    }
}
