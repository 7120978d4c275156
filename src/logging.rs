//! Structured logging to stdout and a size-rotated log file

use crate::errors::{MonitorError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_NAME: &str = "monitor.log";

/// Log file that moves itself aside to `<name>.1`, `<name>.2`, ... once it
/// grows past `max_bytes`. At most `max_files` rotated generations are kept.
#[derive(Debug)]
pub struct SizeRotatingFile {
    path: PathBuf,
    max_bytes: u64,
    max_files: usize,
    file: File,
    written: u64,
}

impl SizeRotatingFile {
    pub fn open(path: PathBuf, max_bytes: u64, max_files: usize) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            path,
            max_bytes,
            max_files,
            file,
            written,
        })
    }

    fn generation(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.max_files > 0 {
            for index in (1..self.max_files).rev() {
                let from = self.generation(index);
                if from.exists() {
                    fs::rename(&from, self.generation(index + 1))?;
                }
            }
            fs::rename(&self.path, self.generation(1))?;
        }

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for SizeRotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }

        let written = self.file.write(buf)?;
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Install the global subscriber. The returned guard must be held for the
/// life of the process or buffered file output is lost.
pub fn initialize_tracing(
    log_dir: &Path,
    verbose: bool,
    max_bytes: u64,
    max_files: usize,
) -> Result<WorkerGuard> {
    let filter_layer = if verbose {
        EnvFilter::try_new("debug")
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))
    }
    .map_err(|e| MonitorError::Config(format!("invalid log filter: {}", e)))?;

    fs::create_dir_all(log_dir)?;
    let file = SizeRotatingFile::open(log_dir.join(LOG_FILE_NAME), max_bytes, max_files)?;
    let (file_writer, guard) = tracing_appender::non_blocking(file);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .json()
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| MonitorError::Other(format!("failed to install tracing subscriber: {}", e)))?;

    Ok(guard)
}
