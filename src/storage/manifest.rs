//! File manifest snapshots of transferred sections.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::pipeline::Mjd;

/// One file in a section snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// The file relative to the staging root, section folder included.
    pub location: String,
    pub filename: String,
    /// The file on disk.
    pub path: String,
    pub size: u64,
    pub modified_time: DateTime<Utc>,
    pub is_symlink: bool,
}

/// Where the manifest for `section` on `mjd` is written.
pub fn manifest_path(staging: &Path, section: &str, mjd: Mjd) -> PathBuf {
    staging
        .join("summaries")
        .join(mjd.to_string())
        .join(format!("{}-{}.json", section, mjd))
}

/// Lists every non-directory entry below `section_root/<mjd>`.
///
/// Symlinks are recorded as links and never followed. Entries are sorted
/// by location.
pub fn collect_manifest(
    staging: &Path,
    section_root: &Path,
    mjd: Mjd,
) -> std::io::Result<Vec<ManifestEntry>> {
    let night = section_root.join(mjd.to_string());
    let mut entries = Vec::new();

    for entry in WalkDir::new(&night).follow_links(false).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_dir() {
            continue;
        }
        let metadata = std::fs::symlink_metadata(entry.path())?;
        let location = entry.path().strip_prefix(staging).unwrap_or(entry.path());

        entries.push(ManifestEntry {
            location: location.display().to_string(),
            filename: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path().display().to_string(),
            size: metadata.len(),
            modified_time: metadata.modified().map(DateTime::<Utc>::from)?,
            is_symlink: metadata.file_type().is_symlink(),
        });
    }

    entries.sort_by(|a, b| a.location.cmp(&b.location));
    Ok(entries)
}

/// Writes the manifest of one section and returns its path.
pub fn export_section(
    staging: &Path,
    section: &str,
    section_root: &Path,
    mjd: Mjd,
) -> std::io::Result<PathBuf> {
    let entries = collect_manifest(staging, section_root, mjd)?;
    let path = manifest_path(staging, section, mjd);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&entries)?;
    std::fs::write(&path, json)?;
    debug!("{} entries in {} manifest", entries.len(), section);
    info!("Exported manifest {}", path.display());
    Ok(path)
}
