//! Size-based log file rotation
//!
//! A [`RotatingFileWriter`] appends to `<file>` until the next write would
//! reach `max_bytes`, then shifts `<file>.1 .. <file>.N-1` up by one,
//! renames `<file>` to `<file>.1` and starts a fresh file. At most
//! `backup_count` historical files are kept.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

pub struct RotatingFileWriter {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    file: Option<File>,
    written: u64,
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl RotatingFileWriter {
    /// Open (or create) the active file in append mode.
    ///
    /// Rotation is disabled when either `max_bytes` or `backup_count` is zero.
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backup_count: usize) -> io::Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            path,
            max_bytes,
            backup_count,
            file: Some(file),
            written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the `index`-th rotated file, e.g. `app.log.2`.
    pub fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn should_rollover(&self, incoming: usize) -> bool {
        self.max_bytes > 0
            && self.backup_count > 0
            && self.written > 0
            && self.written + incoming as u64 >= self.max_bytes
    }

    fn rollover(&mut self) -> io::Result<()> {
        // Close the active handle before renaming it.
        self.file = None;

        for index in (1..self.backup_count).rev() {
            let src = self.backup_path(index);
            if src.exists() {
                let dst = self.backup_path(index + 1);
                if dst.exists() {
                    fs::remove_file(&dst)?;
                }
                fs::rename(&src, &dst)?;
            }
        }

        let first = self.backup_path(1);
        if first.exists() {
            fs::remove_file(&first)?;
        }
        if self.path.exists() {
            fs::rename(&self.path, &first)?;
        }

        self.file = Some(open_append(&self.path)?);
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.should_rollover(buf.len()) {
            self.rollover()?;
        }

        // A failed reopen during rollover leaves no handle; retry here.
        if self.file.is_none() {
            self.file = Some(open_append(&self.path)?);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Shared handle to a rotating file, usable as a `tracing_subscriber` writer.
#[derive(Clone)]
pub struct RotatingFileSink {
    inner: Arc<Mutex<RotatingFileWriter>>,
    path: PathBuf,
}

impl RotatingFileSink {
    pub fn new(writer: RotatingFileWriter) -> Self {
        let path = writer.path().to_path_buf();
        Self {
            inner: Arc::new(Mutex::new(writer)),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Exclusive access to the rotating file for the duration of one record.
pub struct RotatingFileGuard<'a>(MutexGuard<'a, RotatingFileWriter>);

impl Write for RotatingFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFileSink {
    type Writer = RotatingFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        // A panic mid-write leaves nothing inconsistent behind, keep logging.
        let guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        RotatingFileGuard(guard)
    }
}
