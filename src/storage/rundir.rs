//! Versioned run directory allocation.
//!
//! Every invocation for a night gets its own numbered subdirectory
//! (`<parent>/0`, `<parent>/1`, ...) so re-runs never write into an earlier
//! run's logs or archives. Mirror targets instead reuse the parent itself.
//!
//! The next version is `max(numeric children) + 1`. The directory is then
//! created with an exclusive `create_dir`; if another process created the
//! same version in between, the allocator rescans and tries the next one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::AllocationError;

/// Upper bound on create-collide-rescan cycles.
const MAX_ATTEMPTS: u32 = 64;

/// How a run directory is derived from its date-keyed parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationMode {
    /// A fresh numbered subdirectory per invocation.
    Versioned,
    /// The parent directory itself; contents are overwritten in place.
    Reuse,
}

/// Allocates run directories under date-keyed parents.
#[derive(Debug, Clone, Copy)]
pub struct RunDirAllocator {
    mode: AllocationMode,
}

impl RunDirAllocator {
    pub fn new(mode: AllocationMode) -> Self {
        Self { mode }
    }

    pub fn versioned() -> Self {
        Self::new(AllocationMode::Versioned)
    }

    pub fn reuse() -> Self {
        Self::new(AllocationMode::Reuse)
    }

    pub fn mode(&self) -> AllocationMode {
        self.mode
    }

    pub fn allocate(&self, parent: &Path) -> Result<PathBuf, AllocationError> {
        match self.mode {
            AllocationMode::Versioned => allocate_run_dir(parent),
            AllocationMode::Reuse => reuse_run_dir(parent),
        }
    }
}

/// Creates `parent` if needed and returns a new, empty `<parent>/<version>`.
pub fn allocate_run_dir(parent: &Path) -> Result<PathBuf, AllocationError> {
    ensure_parent(parent)?;

    for _ in 0..MAX_ATTEMPTS {
        let version = next_version(parent)?;
        let dir = parent.join(version.to_string());
        match std::fs::create_dir(&dir) {
            Ok(()) => {
                info!("CREATE: {}", dir.display());
                return Ok(dir);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("Version {} taken under {}, rescanning", version, parent.display());
            }
            Err(source) => return Err(AllocationError::CreateVersion { path: dir, source }),
        }
    }

    Err(AllocationError::Contended {
        path: parent.to_path_buf(),
        attempts: MAX_ATTEMPTS,
    })
}

/// Creates `parent` if needed and returns it unchanged.
pub fn reuse_run_dir(parent: &Path) -> Result<PathBuf, AllocationError> {
    ensure_parent(parent)?;
    debug!("USING: {}", parent.display());
    Ok(parent.to_path_buf())
}

/// Returns one past the highest purely numeric child name, or 0.
///
/// Fails with [`AllocationError::Exhausted`] when the highest child is
/// already `u64::MAX`.
pub fn next_version(parent: &Path) -> Result<u64, AllocationError> {
    let entries = std::fs::read_dir(parent).map_err(|source| AllocationError::ReadParent {
        path: parent.to_path_buf(),
        source,
    })?;

    let max = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str().and_then(parse_version))
        .max();

    match max {
        None => Ok(0),
        Some(v) => v.checked_add(1).ok_or_else(|| AllocationError::Exhausted {
            path: parent.to_path_buf(),
        }),
    }
}

fn parse_version(name: &str) -> Option<u64> {
    if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
        name.parse().ok()
    } else {
        None
    }
}

fn ensure_parent(parent: &Path) -> Result<(), AllocationError> {
    match std::fs::create_dir_all(parent) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists && parent.is_dir() => Ok(()),
        Err(source) => Err(AllocationError::CreateParent {
            path: parent.to_path_buf(),
            source,
        }),
    }
}
