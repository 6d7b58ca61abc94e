//! Per-run context handed to stages and backends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::executor::ProcessExecutor;
use crate::pipeline::{Mjd, TransferConfig};

/// Identity and shared resources of one run.
///
/// Owned by the controller; stages and backends only borrow it.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: Arc<TransferConfig>,
    pub mjd: Mjd,
    /// The versioned working directory of this invocation.
    pub run_dir: PathBuf,
    pub executor: Arc<ProcessExecutor>,
}

impl RunContext {
    pub fn new(
        config: Arc<TransferConfig>,
        mjd: Mjd,
        run_dir: impl Into<PathBuf>,
        executor: Arc<ProcessExecutor>,
    ) -> Self {
        Self {
            config,
            mjd,
            run_dir: run_dir.into(),
            executor,
        }
    }

    pub fn staging(&self) -> &Path {
        &self.config.staging
    }

    pub fn log_root(&self) -> PathBuf {
        self.config.log_root()
    }

    pub fn observatory(&self) -> &str {
        &self.config.observatory
    }

    pub fn mode(&self) -> Option<&str> {
        self.config.mode.as_deref()
    }

    pub fn label(&self) -> &str {
        self.config.label()
    }
}
