//! Error types for transfer operations.
//!
//! Defines error types for each subsystem:
//! - Process execution and the single-instance guard
//! - Remote command sessions
//! - Run directory allocation
//! - The status ledger and dashboard rendering
//! - Transfer backends
//! - Configuration loading
//! - Report discovery
//!
//! Stage outcomes (success/failure of a transfer) are not errors; they are
//! recorded as [`StageStatus`](crate::pipeline::StageStatus) values. The
//! variants here describe conditions a caller must branch on.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running external commands.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The wall-clock ceiling fired and the child was killed. Always fatal.
    #[error("Process '{command}' still running after {elapsed:?}; killed")]
    Aborted { command: String, elapsed: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    /// Returns true for conditions that must end the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutorError::Aborted { .. })
    }
}

/// Errors that can occur during remote sessions.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("No remote hosts configured")]
    NoHosts,

    #[error("Not connected")]
    NotConnected,

    #[error("Connection to '{host}' refused: {reason}")]
    Refused { host: String, reason: String },

    #[error("Gave up after trying hosts: {}", hosts.join(", "))]
    Exhausted { hosts: Vec<String> },

    #[error("Failed to start remote command: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while allocating run directories.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("Failed to create parent directory {path:?}: {source}")]
    CreateParent {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list {path:?}: {source}")]
    ReadParent {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create run directory {path:?}: {source}")]
    CreateVersion {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free version under {path:?} after {attempts} attempts")]
    Contended { path: PathBuf, attempts: u32 },

    #[error("Version numbers under {path:?} are exhausted")]
    Exhausted { path: PathBuf },
}

/// Errors that can occur in the status ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Corrupt ledger {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur in transfer backends.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend not ready: {0}")]
    NotReady(String),

    #[error("Archive error for section '{section}': {message}")]
    Archive { section: String, message: String },

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Returns true for conditions that must end the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::Executor(e) if e.is_fatal())
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Configuration file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while locating the night report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
