//! Transfer backends for the mirror and backup stages.
//!
//! A backend is chosen once, when the run is configured, and then driven
//! through the same three calls for every run:
//!
//! 1. [`TransferBackend::prepare`] resolves and activates the endpoint.
//!    A `false` return makes the stage fail without touching any section.
//! 2. [`TransferBackend::execute`] moves one section.
//! 3. [`TransferBackend::finalize`] completes whatever spans sections.
//!
//! Only a fatal executor error is returned as `Err` from the controller's
//! point of view; every other problem is a `success: false` outcome.

mod endpoint;
mod rsync;
mod tarball;

use async_trait::async_trait;
use tracing::warn;

use crate::error::BackendError;
use crate::pipeline::{BackendKind, RunContext, SectionConfig, TransferConfig};
use crate::remote::{OpenSshConnector, RemoteSession};

pub use endpoint::{
    activate, ActivationPolicy, ActivationProbe, Endpoint, HttpStatusProbe, DEFAULT_PROBE_DELAY,
    DEFAULT_PROBE_LIMIT,
};
pub use rsync::RsyncMirrorBackend;
pub use tarball::{TarballBackend, TarballFlavor, ARCHIVE_SYSTEM};

/// Result of one backend call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOutcome {
    pub success: bool,
    /// Backend-specific handle, e.g. the archive written.
    pub identifier: Option<String>,
}

impl BackendOutcome {
    pub fn success(identifier: Option<String>) -> Self {
        Self {
            success: true,
            identifier,
        }
    }

    pub fn failure() -> Self {
        Self::default()
    }
}

/// Uniform contract for mirror and backup mechanisms.
#[async_trait]
pub trait TransferBackend: Send {
    fn name(&self) -> &str;

    /// Resolves the endpoint for this run; false means not ready.
    async fn prepare(&mut self, ctx: &RunContext) -> bool;

    async fn execute(
        &mut self,
        ctx: &RunContext,
        section: &SectionConfig,
    ) -> Result<BackendOutcome, BackendError>;

    async fn finalize(&mut self, ctx: &RunContext) -> Result<BackendOutcome, BackendError>;

    /// The endpoint resolved by `prepare`, if any.
    fn endpoint(&self) -> Option<&Endpoint>;
}

/// The backend pair used by a run.
pub struct Backends {
    pub mirror: Box<dyn TransferBackend>,
    pub backup: Box<dyn TransferBackend>,
}

impl Backends {
    pub fn new(mirror: Box<dyn TransferBackend>, backup: Box<dyn TransferBackend>) -> Self {
        Self { mirror, backup }
    }

    /// Selects backends from `general.backend` and the environment.
    pub fn from_config(config: &TransferConfig) -> Result<Self, BackendError> {
        let env = &config.env;
        let policy = ActivationPolicy::default().with_assume_ready(env.backup_ready);

        let session = match &env.backup_user {
            Some(user) if !env.backup_hosts.is_empty() => Some(RemoteSession::new(
                OpenSshConnector::new(user.clone()),
                env.backup_hosts.clone(),
            )),
            _ => {
                warn!("TRANSFER_BACKUP_USER/TRANSFER_BACKUP_HOST not set; backup cannot connect");
                None
            }
        };
        let probe = HttpStatusProbe::new(env.status_url.clone())?;
        let backup = TarballBackend::backup(env.backup_dir.clone(), session)
            .with_probe(Box::new(probe), policy);

        let mirror: Box<dyn TransferBackend> = match config.general.backend {
            BackendKind::Tarball => Box::new(TarballBackend::<OpenSshConnector>::mirror(
                env.mirror_backup.clone(),
            )),
            BackendKind::Rsync => Box::new(RsyncMirrorBackend::new()),
        };

        Ok(Self::new(mirror, Box::new(backup)))
    }
}
