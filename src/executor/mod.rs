//! External command execution.
//!
//! Every stage reaches the outside world through [`ProcessExecutor`]:
//! rsync transfers, checksum tools, ssh probes. The executor owns three
//! concerns:
//!
//! - **Bounded waits**: children are polled with a widening interval and
//!   killed after a hard ceiling. A killed child is reported as `aborted`,
//!   which callers must treat as fatal.
//! - **Full capture**: stdout and stderr are returned whole for logging.
//! - **Single instance**: a pid file per MJD keeps two invocations from
//!   working on the same night.

mod instance;
mod process;

pub use instance::InstanceClaim;
pub use process::{
    poll_interval, CommandSpec, ExecOutcome, ExecutorConfig, ProcessExecutor, DEFAULT_CEILING,
    DEFAULT_MIN_POLL,
};
