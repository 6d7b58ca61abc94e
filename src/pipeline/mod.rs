//! Pipeline orchestration for nightly transfers.
//!
//! The pipeline runs a fixed sequence of stages for one night (MJD):
//!
//! | Stage    | Work                                                   |
//! |----------|--------------------------------------------------------|
//! | report   | find the night report; advisory                        |
//! | download | pull each section from its source host                 |
//! | verify   | check sums, export manifests                           |
//! | copy     | archive into local destinations, leave a done marker   |
//! | mirror   | mirror backend (tarball or rsync)                      |
//! | backup   | backup backend (versioned tarballs staged for tape)    |
//!
//! # Example
//!
//! ```rust,ignore
//! use transfer::pipeline::{Mjd, PipelineController, StageSelection, TransferConfig};
//!
//! let config = TransferConfig::load("apo", None, None)?;
//! let mut controller = PipelineController::new(config, StageSelection::all());
//! let report = controller.run(Mjd::today()).await?;
//! println!("success: {}", report.success());
//! ```

pub mod config;
pub mod context;
pub mod controller;
pub mod state;
pub mod types;

pub use config::{
    BackendKind, GeneralConfig, SectionConfig, TransferConfig, TransferEnv, VerifyMethod,
    DEFAULT_LOG_DIR, DEFAULT_STATUS_URL,
};
pub use context::RunContext;
pub use controller::{run_backend, PipelineController, PipelineError, PipelineReport};
pub use state::{PipelineState, StageFailure};
pub use types::{Mjd, Stage, StageSelection, StageStatus};
