//! The stage sequencer.
//!
//! One [`PipelineController::run`] call processes one night:
//!
//! 1. Claim the night through the executor's single-instance guard.
//! 2. Load the ledger, mark intent for every stage and save. With no
//!    sections left to transfer, every enabled stage is recorded as failed
//!    and nothing runs.
//! 3. Allocate a fresh versioned run directory and start the run log.
//! 4. Run the enabled stages in their fixed order. Each outcome is appended
//!    to the ledger and saved before the next stage starts. After the first
//!    failure the remaining stages are not attempted and keep their
//!    `incomplete` intent entry.
//! 5. Release the guard.
//!
//! The report stage is advisory: its outcome is recorded but never stops
//! the run. Only a fatal executor error (a killed child) ends a run early
//! with `Err`.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};

use crate::backends::{Backends, TransferBackend};
use crate::error::{AllocationError, BackendError, ConfigError, ExecutorError, LedgerError};
use crate::executor::{InstanceClaim, ProcessExecutor};
use crate::logging::RunLogFile;
use crate::pipeline::{
    Mjd, PipelineState, RunContext, SectionConfig, Stage, StageSelection, StageStatus,
    TransferConfig,
};
use crate::stages::{run_report, CopyStage, DownloadStage, VerifyStage};
use crate::storage::{Dashboard, RunDirAllocator, StatusLedger};

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Another instance (pid {pid}) is processing {mjd}")]
    InstanceInUse { pid: u32, mjd: Mjd },

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),
}

impl PipelineError {
    /// True when a child had to be killed at the executor ceiling.
    pub fn is_fatal(&self) -> bool {
        match self {
            PipelineError::Executor(e) => e.is_fatal(),
            PipelineError::Backend(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// What a finished run did.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub mjd: Mjd,
    pub run_dir: Option<PathBuf>,
    pub ledger_path: PathBuf,
    pub logfile: Option<String>,
    pub state: PipelineState,
}

impl PipelineReport {
    pub fn success(&self) -> bool {
        !self.state.has_failure()
    }
}

/// Drives the fixed stage sequence for one observatory and mode.
pub struct PipelineController {
    config: Arc<TransferConfig>,
    selection: StageSelection,
    executor: Arc<ProcessExecutor>,
    allocator: RunDirAllocator,
    backends: Option<Backends>,
    download: DownloadStage,
    run_log: Option<RunLogFile>,
}

impl PipelineController {
    pub fn new(config: TransferConfig, selection: StageSelection) -> Self {
        Self {
            config: Arc::new(config),
            selection,
            executor: Arc::new(ProcessExecutor::default()),
            allocator: RunDirAllocator::versioned(),
            backends: None,
            download: DownloadStage::default(),
            run_log: None,
        }
    }

    pub fn with_executor(mut self, executor: ProcessExecutor) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    /// Uses these backends instead of building them from the configuration.
    pub fn with_backends(mut self, backends: Backends) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn with_download_stage(mut self, download: DownloadStage) -> Self {
        self.download = download;
        self
    }

    /// Directs file logging into each run directory.
    pub fn with_run_log(mut self, run_log: RunLogFile) -> Self {
        self.run_log = Some(run_log);
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn selection(&self) -> StageSelection {
        self.selection
    }

    /// Processes `mjd` under the single-instance guard.
    pub async fn run(&mut self, mjd: Mjd) -> Result<PipelineReport, PipelineError> {
        match self.executor.claim_instance(mjd).await? {
            InstanceClaim::Claimed { .. } => {}
            InstanceClaim::InUse { pid, .. } => {
                return Err(PipelineError::InstanceInUse { pid, mjd });
            }
        }

        let result = self.run_claimed(mjd).await;

        if let Some(run_log) = &self.run_log {
            run_log.close();
        }
        self.executor.release_instance(mjd);
        result
    }

    async fn run_claimed(&mut self, mjd: Mjd) -> Result<PipelineReport, PipelineError> {
        let config = Arc::clone(&self.config);
        let dashboard = Dashboard::new(config.log_root(), &config.observatory, config.mode.as_deref())
            .with_template_dir(config.env.template_dir.clone());

        let mut ledger = StatusLedger::load(config.log_root(), mjd)?;
        ledger.mark_intent(&self.selection);
        persist(&mut ledger, &dashboard)?;

        let mut state = PipelineState::new();
        if config.sections.is_empty() {
            error!(critical = true, "No sections selected for {}; nothing to transfer", config.label());
            for stage in self.selection.enabled() {
                ledger.append(stage, StageStatus::Failure);
                if stage == Stage::Report {
                    state.record_advisory(stage, StageStatus::Failure);
                } else {
                    state.record(stage, StageStatus::Failure, "no sections selected");
                }
            }
            persist(&mut ledger, &dashboard)?;
            return Ok(PipelineReport {
                mjd,
                run_dir: None,
                ledger_path: ledger.path().to_path_buf(),
                logfile: ledger.status().logfile.clone(),
                state,
            });
        }

        let run_dir = match self.allocator.allocate(&config.night_log_dir(mjd)) {
            Ok(run_dir) => run_dir,
            Err(e) => {
                error!(critical = true, "Cannot allocate run directory: {}", e);
                if let Some(stage) = self.selection.enabled().into_iter().next() {
                    ledger.append(stage, StageStatus::Failure);
                    state.record(stage, StageStatus::Failure, e.to_string());
                    persist(&mut ledger, &dashboard)?;
                }
                return Ok(PipelineReport {
                    mjd,
                    run_dir: None,
                    ledger_path: ledger.path().to_path_buf(),
                    logfile: ledger.status().logfile.clone(),
                    state,
                });
            }
        };

        if let Some(run_log) = &self.run_log {
            let path = run_dir.join(format!("{}.log", config.log_name()));
            if let Err(e) = run_log.open(&path) {
                warn!("Cannot open run log {}: {}", path.display(), e);
            }
        }
        info!(
            "Transfer {} for MJD {} in {}",
            config.label(),
            mjd,
            run_dir.display()
        );

        if (self.selection.mirror || self.selection.backup) && self.backends.is_none() {
            self.backends = Some(Backends::from_config(&config)?);
        }

        let ctx = RunContext::new(
            Arc::clone(&config),
            mjd,
            run_dir.clone(),
            Arc::clone(&self.executor),
        );

        for stage in Stage::ALL {
            if !self.selection.is_enabled(stage) {
                continue;
            }
            if !state.is_ready() {
                info!("Not running {} after an earlier failure", stage);
                continue;
            }

            let span = info_span!("stage", stage = stage.as_str(), mjd = mjd.value());
            let result = self
                .run_stage(stage, &ctx, &mut ledger)
                .instrument(span)
                .await;

            let status = match result {
                Ok(status) => status,
                Err(e) => {
                    error!(critical = true, "{} aborted: {}", stage, e);
                    ledger.append(stage, StageStatus::Failure);
                    persist(&mut ledger, &dashboard)?;
                    return Err(e);
                }
            };

            ledger.append(stage, status);
            if stage == Stage::Report {
                state.record_advisory(stage, status);
            } else {
                state.record(stage, status, format!("{} failed", stage));
            }
            persist(&mut ledger, &dashboard)?;
            info!("{} {}", stage, status);
        }

        if let Some(failure) = state.last_error() {
            warn!("Run for {} stopped at {}: {}", mjd, failure.stage, failure.reason);
        }

        Ok(PipelineReport {
            mjd,
            run_dir: Some(run_dir),
            ledger_path: ledger.path().to_path_buf(),
            logfile: ledger.status().logfile.clone(),
            state,
        })
    }

    async fn run_stage(
        &mut self,
        stage: Stage,
        ctx: &RunContext,
        ledger: &mut StatusLedger,
    ) -> Result<StageStatus, PipelineError> {
        let sections = &ctx.config.sections;
        let status = match stage {
            Stage::Report => {
                let logfile = run_report(ctx).await;
                let status = if logfile.is_some() {
                    StageStatus::Success
                } else {
                    StageStatus::Failure
                };
                ledger.set_logfile(logfile);
                status
            }
            Stage::Download => self.download.run(ctx, sections).await?,
            Stage::Verify => VerifyStage::new().run(ctx, sections).await?,
            Stage::Copy => CopyStage::new().run(ctx, sections).await?,
            Stage::Mirror | Stage::Backup => {
                let Some(backends) = self.backends.as_mut() else {
                    error!("No backend configured for {}", stage);
                    return Ok(StageStatus::Failure);
                };
                let backend = if stage == Stage::Mirror {
                    backends.mirror.as_mut()
                } else {
                    backends.backup.as_mut()
                };
                run_backend(backend, ctx, sections).await?
            }
        };
        Ok(status)
    }
}

/// Saves the ledger and refreshes the dashboard when the save wrote.
fn persist(ledger: &mut StatusLedger, dashboard: &Dashboard) -> Result<(), PipelineError> {
    if ledger.save()? {
        if let Err(e) = dashboard.write(&ledger.aggregate_across_runs()) {
            warn!("Dashboard not updated: {}", e);
        }
    }
    Ok(())
}

/// Runs one backend through prepare, every section, and finalize.
pub async fn run_backend(
    backend: &mut dyn TransferBackend,
    ctx: &RunContext,
    sections: &[SectionConfig],
) -> Result<StageStatus, BackendError> {
    if !backend.prepare(ctx).await {
        error!("{} backend is not ready", backend.name());
        return Ok(StageStatus::Failure);
    }

    let mut ok = true;
    for section in sections {
        match backend.execute(ctx, section).await {
            Ok(outcome) if outcome.success => {}
            Ok(_) => {
                error!("{} failed for {}", backend.name(), section.name);
                ok = false;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("{} failed for {}: {}", backend.name(), section.name, e);
                ok = false;
            }
        }
    }

    match backend.finalize(ctx).await {
        Ok(outcome) if outcome.success => {}
        Ok(_) => ok = false,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            error!("{} finalize failed: {}", backend.name(), e);
            ok = false;
        }
    }

    Ok(if ok {
        StageStatus::Success
    } else {
        StageStatus::Failure
    })
}
