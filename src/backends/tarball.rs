//! Tar archive backend for the backup and mirror stages.
//!
//! Backup archives go to a fresh versioned directory
//! `<backup_dir>/<label>/archive/<mjd>/<version>/<section>/<mjd>_<section>.tar`
//! and are copied into `<backup_dir>/hpss/staging/<label>/<section>/` for
//! pickup by the tape system. Mirror archives overwrite
//! `<mirror_dir>/archive/<label>/<mjd>/<mjd>_<section>.tgz` in place.

use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, error, info, warn};

use super::{activate, ActivationPolicy, ActivationProbe, BackendOutcome, Endpoint, TransferBackend};
use crate::error::BackendError;
use crate::pipeline::{Mjd, RunContext, SectionConfig};
use crate::remote::{HostConnector, RemoteSession};
use crate::storage::RunDirAllocator;

/// Storage system name used in archive paths.
pub const ARCHIVE_SYSTEM: &str = "archive";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarballFlavor {
    /// Versioned, uncompressed, staged for tape.
    Backup,
    /// Reused directory, gzip compressed.
    Mirror,
}

impl TarballFlavor {
    fn extension(&self) -> &'static str {
        match self {
            TarballFlavor::Backup => "tar",
            TarballFlavor::Mirror => "tgz",
        }
    }
}

/// Archives each section's night directory with `tar`.
pub struct TarballBackend<C> {
    flavor: TarballFlavor,
    base: Option<PathBuf>,
    session: Option<RemoteSession<C>>,
    probe: Option<Box<dyn ActivationProbe>>,
    policy: ActivationPolicy,
    endpoint: Option<Endpoint>,
    staged: Vec<PathBuf>,
}

impl<C: HostConnector> TarballBackend<C> {
    /// Backup flavor; `session` reaches the hosts that read the staging area.
    pub fn backup(base: Option<PathBuf>, session: Option<RemoteSession<C>>) -> Self {
        Self {
            flavor: TarballFlavor::Backup,
            base,
            session,
            probe: None,
            policy: ActivationPolicy::default().with_assume_ready(true),
            endpoint: None,
            staged: Vec::new(),
        }
    }

    pub fn mirror(base: Option<PathBuf>) -> Self {
        Self {
            flavor: TarballFlavor::Mirror,
            base,
            session: None,
            probe: None,
            policy: ActivationPolicy::default().with_assume_ready(true),
            endpoint: None,
            staged: Vec::new(),
        }
    }

    pub fn with_probe(mut self, probe: Box<dyn ActivationProbe>, policy: ActivationPolicy) -> Self {
        self.probe = Some(probe);
        self.policy = policy;
        self
    }

    pub fn flavor(&self) -> TarballFlavor {
        self.flavor
    }

    /// Date-keyed parent of the run's archive directory.
    pub fn night_dir(&self, base: &Path, label: &str, mjd: Mjd) -> PathBuf {
        match self.flavor {
            TarballFlavor::Backup => base.join(label).join(ARCHIVE_SYSTEM).join(mjd.to_string()),
            TarballFlavor::Mirror => base.join(ARCHIVE_SYSTEM).join(label).join(mjd.to_string()),
        }
    }

    /// `<base>/hpss/staging/<label>`.
    pub fn hpss_staging_dir(base: &Path, label: &str) -> PathBuf {
        base.join("hpss").join("staging").join(label)
    }

    fn allocator(&self) -> RunDirAllocator {
        match self.flavor {
            TarballFlavor::Backup => RunDirAllocator::versioned(),
            TarballFlavor::Mirror => RunDirAllocator::reuse(),
        }
    }

    fn active_dir(&self) -> Option<&Path> {
        self.endpoint
            .as_ref()
            .filter(|e| e.active)
            .and_then(|e| e.base_dir.as_deref())
    }
}

#[async_trait]
impl<C: HostConnector + 'static> TransferBackend for TarballBackend<C> {
    fn name(&self) -> &str {
        match self.flavor {
            TarballFlavor::Backup => "tarball-backup",
            TarballFlavor::Mirror => "tarball-mirror",
        }
    }

    async fn prepare(&mut self, ctx: &RunContext) -> bool {
        self.staged.clear();
        let Some(base) = self.base.clone() else {
            error!(critical = true, "{}: no base directory configured", self.name());
            self.endpoint = Some(Endpoint::new(self.name(), None));
            return false;
        };

        let parent = self.night_dir(&base, ctx.label(), ctx.mjd);
        let dir = match self.allocator().allocate(&parent) {
            Ok(dir) => dir,
            Err(e) => {
                error!(critical = true, "{}: {}", self.name(), e);
                self.endpoint = Some(Endpoint::new(self.name(), None));
                return false;
            }
        };
        let mut endpoint = Endpoint::new(self.name(), Some(dir));

        endpoint.active = match &self.probe {
            Some(probe) => activate(probe.as_ref(), &self.policy).await,
            None => true,
        };

        if endpoint.active && self.flavor == TarballFlavor::Backup {
            endpoint.active = match self.session.as_mut() {
                Some(session) => session.connect().await,
                None => false,
            };
            if !endpoint.active {
                error!(critical = true, "Backup hosts not reachable. Giving up!");
            }
        }

        info!("{} ready={} dir={:?}", self.name(), endpoint.active, endpoint.base_dir);
        self.endpoint = Some(endpoint);
        self.active_dir().is_some()
    }

    async fn execute(
        &mut self,
        ctx: &RunContext,
        section: &SectionConfig,
    ) -> Result<BackendOutcome, BackendError> {
        let Some(dir) = self.active_dir().map(Path::to_path_buf) else {
            return Err(BackendError::NotReady(self.name().to_string()));
        };

        let section_root = section.local_root(ctx.staging());
        if !section_root.join(ctx.mjd.to_string()).is_dir() {
            warn!("Skipping {}: nothing staged for {}", section.name, ctx.mjd);
            return Ok(BackendOutcome::success(None));
        }

        let tar_dir = match self.flavor {
            TarballFlavor::Backup => dir.join(&section.name),
            TarballFlavor::Mirror => dir,
        };
        std::fs::create_dir_all(&tar_dir)?;
        let file_name = format!("{}_{}.{}", ctx.mjd, section.name, self.flavor.extension());
        let archive = tar_dir.join(&file_name);

        let compress = self.flavor == TarballFlavor::Mirror;
        let (root, target, mjd) = (section_root.clone(), archive.clone(), ctx.mjd);
        let written = tokio::task::spawn_blocking(move || write_archive(&root, mjd, &target, compress))
            .await
            .map_err(|e| BackendError::Archive {
                section: section.name.clone(),
                message: e.to_string(),
            })?;
        if let Err(e) = written {
            error!("tar create {} failed: {}", archive.display(), e);
            return Ok(BackendOutcome::failure());
        }
        info!("tar create {}", archive.display());

        if self.flavor == TarballFlavor::Backup {
            let Some(base) = &self.base else {
                return Ok(BackendOutcome::failure());
            };
            let staging_dir = Self::hpss_staging_dir(base, ctx.label()).join(&section.name);
            std::fs::create_dir_all(&staging_dir)?;
            let staged = staging_dir.join(&file_name);
            if let Err(e) = std::fs::copy(&archive, &staged) {
                warn!("BACKUP STAGING> Failed to copy: {}", e);
                return Ok(BackendOutcome::failure());
            }
            info!("BACKUP STAGING> {}", staged.display());
            self.staged.push(staged);
        }

        Ok(BackendOutcome::success(Some(archive.display().to_string())))
    }

    /// Backup: confirms from the backup host that every staged archive is visible.
    async fn finalize(&mut self, _ctx: &RunContext) -> Result<BackendOutcome, BackendError> {
        if self.flavor == TarballFlavor::Mirror || self.staged.is_empty() {
            return Ok(BackendOutcome::success(None));
        }
        let Some(dir) = self.active_dir().map(Path::to_path_buf) else {
            return Err(BackendError::NotReady(self.name().to_string()));
        };
        let Some(session) = self.session.as_mut() else {
            return Err(BackendError::NotReady(self.name().to_string()));
        };

        if let Some(host) = session.active_host() {
            let host = host.to_string();
            session.set_output_files(
                &dir.join(format!("transfer.remote.{}.ls.out.txt", host)),
                &dir.join(format!("transfer.remote.{}.ls.err.txt", host)),
            )?;
        }
        let listing = self
            .staged
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let response = session.exec(&format!("ls -l {}", listing)).await?;
        session.close();

        if response.success() {
            debug!("{}", response.stdout);
            Ok(BackendOutcome::success(None))
        } else {
            error!(
                critical = true,
                "Staged archives not visible from backup host [RETURN CODE={}]", response.exit_code
            );
            Ok(BackendOutcome::failure())
        }
    }

    fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }
}

/// Writes `<section_root>/<mjd>` into `target`, with entries named `<mjd>/...`.
///
/// Symlinks are archived as links.
fn write_archive(section_root: &Path, mjd: Mjd, target: &Path, compress: bool) -> std::io::Result<()> {
    let night = section_root.join(mjd.to_string());
    let file = File::create(target)?;
    if compress {
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        builder.append_dir_all(mjd.to_string(), &night)?;
        builder.into_inner()?.finish()?;
    } else {
        let mut builder = tar::Builder::new(file);
        builder.follow_symlinks(false);
        builder.append_dir_all(mjd.to_string(), &night)?;
        builder.finish()?;
    }
    Ok(())
}
