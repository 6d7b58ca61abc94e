//! Direct rsync mirror of staged nights.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{BackendOutcome, Endpoint, TransferBackend};
use crate::error::BackendError;
use crate::pipeline::{RunContext, SectionConfig};
use crate::stages::rsync::RsyncOptions;

/// Pushes `<staging>/<folder>/<mjd>/` to each section's `mirror_path`.
#[derive(Debug, Default)]
pub struct RsyncMirrorBackend {
    endpoint: Option<Endpoint>,
    pushed: usize,
}

impl RsyncMirrorBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransferBackend for RsyncMirrorBackend {
    fn name(&self) -> &str {
        "rsync-mirror"
    }

    async fn prepare(&mut self, _ctx: &RunContext) -> bool {
        let mut endpoint = Endpoint::new(self.name(), None);
        endpoint.active = true;
        self.endpoint = Some(endpoint);
        self.pushed = 0;
        true
    }

    async fn execute(
        &mut self,
        ctx: &RunContext,
        section: &SectionConfig,
    ) -> Result<BackendOutcome, BackendError> {
        let Some(mirror_path) = section.mirror_path.as_deref() else {
            warn!("No mirror_path for {}; skipping", section.name);
            return Ok(BackendOutcome::success(None));
        };
        let local = section.local_dir(ctx.staging(), ctx.mjd);
        if !local.is_dir() {
            warn!("Skipping {}: nothing staged for {}", section.name, ctx.mjd);
            return Ok(BackendOutcome::success(None));
        }

        let dest = format!("{}/{}/", mirror_path.trim_end_matches('/'), ctx.mjd);
        let options = RsyncOptions::for_section(section, ctx.config.general.permission);
        let command = options.command(&format!("{}/", local.display()), &dest);
        let outcome = ctx.executor.run(&command).await?.check_aborted(&command)?;

        if outcome.success() {
            self.pushed += 1;
            info!("MIRROR {} -> {}", section.name, dest);
            Ok(BackendOutcome::success(Some(dest)))
        } else {
            Ok(BackendOutcome::failure())
        }
    }

    /// Sends the night's done marker to the remote status directory.
    async fn finalize(&mut self, ctx: &RunContext) -> Result<BackendOutcome, BackendError> {
        let Some(status_dir) = ctx.config.general.remote_status_dir.as_deref() else {
            return Ok(BackendOutcome::success(None));
        };
        let marker = ctx
            .config
            .night_log_dir(ctx.mjd)
            .join(format!("transfer-{}.done", ctx.mjd));
        if self.pushed == 0 || !marker.exists() {
            return Ok(BackendOutcome::success(None));
        }

        let options = RsyncOptions {
            permission: ctx.config.general.permission,
            ..RsyncOptions::default()
        };
        let dest = format!("{}/", status_dir.trim_end_matches('/'));
        let command = options.command(&marker.display().to_string(), &dest);
        let outcome = ctx.executor.run(&command).await?.check_aborted(&command)?;
        if outcome.success() {
            info!("Touch {}transfer-{}.done", dest, ctx.mjd);
            Ok(BackendOutcome::success(Some(dest)))
        } else {
            warn!("FAILED touch {}transfer-{}.done", dest, ctx.mjd);
            Ok(BackendOutcome::failure())
        }
    }

    fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }
}
