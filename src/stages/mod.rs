//! Stage runners for report, download, verify and copy.
//!
//! Each runner takes the run context and the configured sections and
//! returns the stage status. `Err` is reserved for the fatal executor
//! ceiling; every other problem is logged and folded into
//! [`StageStatus::Failure`].

pub mod copy;
pub mod download;
pub mod report;
pub mod rsync;
pub mod verify;

use tracing::error;

use crate::error::ExecutorError;
use crate::executor::{CommandSpec, ExecOutcome, ProcessExecutor};
use crate::pipeline::StageStatus;

pub use copy::CopyStage;
pub use download::DownloadStage;
pub use report::{run_report, ReportLocator};
pub use verify::VerifyStage;

/// Runs a command, keeping only the ceiling as an error.
///
/// Spawn and I/O failures are logged and reported as `None` so the caller
/// can mark its stage failed and carry on.
pub(crate) async fn run_checked(
    executor: &ProcessExecutor,
    command: &CommandSpec,
    ignore_error: bool,
) -> Result<Option<ExecOutcome>, ExecutorError> {
    match executor.execute(command, ignore_error).await {
        Ok(outcome) => outcome.check_aborted(command).map(Some),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            error!("{}: {}", command, e);
            Ok(None)
        }
    }
}

pub(crate) fn status_from(ok: bool) -> StageStatus {
    if ok {
        StageStatus::Success
    } else {
        StageStatus::Failure
    }
}
