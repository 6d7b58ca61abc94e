//! Copy stage: archives staged nights into their local destinations.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use super::rsync::archive_command;
use super::{run_checked, status_from};
use crate::error::ExecutorError;
use crate::pipeline::{Mjd, RunContext, SectionConfig, StageStatus};

/// Marker recording the copy outcome for a night.
pub fn marker_path(night_log_dir: &Path, mjd: Mjd, done: bool) -> PathBuf {
    let suffix = if done { "done" } else { "fail" };
    night_log_dir.join(format!("transfer-{}.{}", mjd, suffix))
}

/// Creates (or refreshes) the done or fail marker.
pub fn touch_marker(night_log_dir: &Path, mjd: Mjd, done: bool) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(night_log_dir)?;
    let path = marker_path(night_log_dir, mjd, done);
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?
        .set_modified(std::time::SystemTime::now())?;
    Ok(path)
}

/// Removes empty directories directly below `destination`.
pub fn drop_empty(destination: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(destination)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        if std::fs::read_dir(&path)?.next().is_none() {
            std::fs::remove_dir(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Points `<link_dir>/<mjd>` at `night` for each link directory.
///
/// Existing links or directories are left alone.
pub fn add_links(night: &Path, link_dirs: &[PathBuf], mjd: Mjd) -> std::io::Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    if !night.is_dir() {
        return Ok(created);
    }
    for dir in link_dirs {
        let link = dir.join(mjd.to_string());
        if link.symlink_metadata().is_ok() {
            info!("Skipping symbolic link: {} exists", link.display());
            continue;
        }
        info!("Creating symbolic link {} -> {}", night.display(), link.display());
        std::os::unix::fs::symlink(night, &link)?;
        created.push(link);
    }
    Ok(created)
}

/// Deletes five-digit night directories under `root` older than `days`.
pub fn drop_old_nights(root: &Path, mjd: Mjd, days: u32) -> std::io::Result<Vec<PathBuf>> {
    let mut dropped = Vec::new();
    let Some(oldest) = mjd.value().checked_sub(days) else {
        return Ok(dropped);
    };
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.len() != 5 || !name.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if name.parse::<u32>().is_ok_and(|night| night < oldest) {
            info!("Dropping {} - MJD>{} days old", entry.path().display(), days);
            std::fs::remove_dir_all(entry.path())?;
            dropped.push(entry.path());
        }
    }
    dropped.sort();
    Ok(dropped)
}

/// Runs the copy stage over all sections.
#[derive(Debug, Clone, Default)]
pub struct CopyStage;

impl CopyStage {
    pub fn new() -> Self {
        Self
    }

    /// Copies every section, then leaves the done or fail marker.
    pub async fn run(
        &self,
        ctx: &RunContext,
        sections: &[SectionConfig],
    ) -> Result<StageStatus, ExecutorError> {
        let mut ok = true;
        for section in sections {
            if !self.copy_section(ctx, section).await? {
                ok = false;
            }
        }

        let night_log_dir = ctx.config.night_log_dir(ctx.mjd);
        match touch_marker(&night_log_dir, ctx.mjd, ok) {
            Ok(path) => info!("Touched {}", path.display()),
            Err(e) => {
                error!(critical = true, "Error touching marker in {}: {}", night_log_dir.display(), e);
                ok = false;
            }
        }
        Ok(status_from(ok))
    }

    async fn copy_section(
        &self,
        ctx: &RunContext,
        section: &SectionConfig,
    ) -> Result<bool, ExecutorError> {
        let destination = match section.copy_destination() {
            Ok(Some(destination)) => destination,
            Ok(None) => return Ok(true),
            Err(e) => {
                error!(critical = true, "No copy destination for {}: {}", section.name, e);
                return Ok(false);
            }
        };
        let source = section.local_root(ctx.staging());
        let night = section.local_dir(ctx.staging(), ctx.mjd);
        if !night.is_dir() {
            info!("No {} data staged for {}; nothing to copy", section.name, ctx.mjd);
            return Ok(true);
        }
        if !destination.is_dir() {
            error!(
                critical = true,
                "Could not find destination directory {}",
                destination.display()
            );
            return Ok(false);
        }

        let target = destination.join(ctx.mjd.to_string());
        let command = archive_command(&night, &target);
        info!("COPY {}", command);
        let copied = run_checked(&ctx.executor, &command, false)
            .await?
            .is_some_and(|outcome| outcome.success());
        if !copied {
            error!(critical = true, "Error detected while copying {}.", night.display());
            return Ok(false);
        }
        info!("Successful copy {}/ {}/", night.display(), target.display());

        if let Err(e) = drop_empty(&destination) {
            error!(
                critical = true,
                "Error removing empty directories in {}: {}",
                destination.display(),
                e
            );
            return Ok(false);
        }
        if let Err(e) = add_links(&target, &section.links, ctx.mjd) {
            warn!("Symbolic link for {} failed: {}", section.name, e);
        }
        if let Some(days) = ctx.config.general.retention_days {
            if let Err(e) = drop_old_nights(&source, ctx.mjd, days) {
                warn!("Retention cleanup in {} failed: {}", source.display(), e);
            }
        }
        Ok(true)
    }
}
