//! transfer: nightly observatory data transfer.
//!
//! Moves one night of data through a fixed sequence of stages (report,
//! download, verify, copy, mirror, backup) and records every outcome in a
//! per-night status ledger that also feeds a cross-night dashboard.

// Core modules
pub mod backends;
pub mod cli;
pub mod error;
pub mod executor;
pub mod logging;
pub mod pipeline;
pub mod remote;
pub mod stages;
pub mod storage;

// Re-export commonly used error types
pub use error::{
    AllocationError, BackendError, ConfigError, ExecutorError, LedgerError, RemoteError,
    ReportError,
};
