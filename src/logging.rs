//! Tracing setup: console output plus a per-run log file.
//!
//! The run log lives in the versioned run directory, which does not exist
//! until the controller allocates it. [`RunLogFile`] is installed as the
//! file layer's writer up front and pointed at a file later; until then
//! (and after [`RunLogFile::close`]) file output is discarded.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Default)]
struct Target {
    path: Option<PathBuf>,
    file: Option<File>,
}

/// Shared handle on the current run's log file.
#[derive(Debug, Clone, Default)]
pub struct RunLogFile {
    inner: Arc<Mutex<Target>>,
}

impl RunLogFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts appending log output to `path`.
    pub fn open(&self, path: &Path) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut target = self.lock()?;
        target.path = Some(path.to_path_buf());
        target.file = Some(file);
        Ok(())
    }

    /// Stops file output and flushes what was written.
    pub fn close(&self) {
        if let Ok(mut target) = self.lock() {
            if let Some(file) = target.file.as_mut() {
                let _ = file.flush();
            }
            target.file = None;
        }
    }

    /// Path of the open log file, if any.
    pub fn path(&self) -> Option<PathBuf> {
        self.lock().ok().and_then(|target| target.path.clone())
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, Target>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("run log lock poisoned"))
    }
}

/// Writer handed out per event by [`RunLogFile`].
pub struct RunLogWriter {
    inner: Arc<Mutex<Target>>,
}

impl Write for RunLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut target = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("run log lock poisoned"))?;
        match target.file.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut target = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("run log lock poisoned"))?;
        match target.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for RunLogFile {
    type Writer = RunLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogWriter {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Filter directive: `RUST_LOG` wins, then `--debug`, then `--log-level`.
pub fn filter_directive(log_level: &str, debug: bool) -> String {
    match std::env::var("RUST_LOG") {
        Ok(filter) if !filter.trim().is_empty() => filter,
        _ if debug => "debug".to_string(),
        _ => log_level.to_string(),
    }
}

/// Installs the global subscriber and returns the run log handle.
pub fn init(log_level: &str, debug: bool) -> RunLogFile {
    let run_log = RunLogFile::new();
    let filter = EnvFilter::try_new(filter_directive(log_level, debug))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(run_log.clone()),
        )
        .init();

    run_log
}
