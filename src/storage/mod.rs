//! Durable run state: versioned run directories, the per-run status
//! ledger, section manifests, and the cross-run dashboard.
//!
//! # Layout
//!
//! ```text
//! <staging>/<log_dir>/
//!     index.html                  dashboard
//!     <mjd>/
//!         <mjd>_status.json       ledger
//!         transfer-<mjd>.done     copy marker (or .fail)
//!         <version>/              one per invocation
//!             transfer.<obs>-<mode>.log
//!             download.<section>.<i>.rsync.txt
//! <staging>/summaries/<mjd>/<section>-<mjd>.json
//! ```

pub mod dashboard;
pub mod ledger;
pub mod manifest;
pub mod rundir;

pub use dashboard::{status_colors, template_dir_from_env, Dashboard};
pub use ledger::{
    aggregate_across_runs, compress, ledger_path, CompressedRunStatus, HistoryEntry, RunStatus,
    StatusLedger,
};
pub use manifest::{collect_manifest, export_section, manifest_path, ManifestEntry};
pub use rundir::{allocate_run_dir, next_version, reuse_run_dir, AllocationMode, RunDirAllocator};
