//! Per-run status ledger.
//!
//! Each night has one JSON record at `<log_root>/<mjd>/<mjd>_status.json`:
//!
//! ```json
//! {
//!   "date": 60000,
//!   "history": [
//!     { "stage": "download", "status": "incomplete", "timestamp": "..." },
//!     { "stage": "download", "status": "success", "timestamp": "..." }
//!   ],
//!   "logfile": "2023-02-24.12:00:01.log"
//! }
//! ```
//!
//! History is append-only: re-running a stage adds an entry, it never edits
//! an earlier one. The dashboard view compresses each record to the most
//! recent non-`skip` entry per stage.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::pipeline::{Mjd, Stage, StageSelection, StageStatus};

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub stage: Stage,
    pub status: StageStatus,
    pub timestamp: DateTime<Utc>,
}

/// Persisted record for one night.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub date: Mjd,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub logfile: Option<String>,
}

impl RunStatus {
    pub fn new(date: Mjd) -> Self {
        Self {
            date,
            history: Vec::new(),
            logfile: None,
        }
    }
}

/// A run reduced to its latest meaningful outcome per stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompressedRunStatus {
    pub date: Mjd,
    pub logfile: Option<String>,
    /// Latest non-`skip` entry per stage; `None` when the stage never ran.
    pub stages: BTreeMap<Stage, Option<HistoryEntry>>,
}

impl CompressedRunStatus {
    pub fn latest(&self, stage: Stage) -> Option<&HistoryEntry> {
        self.stages.get(&stage).and_then(Option::as_ref)
    }
}

/// Reduces a run's history to the most recent non-`skip` entry per stage.
pub fn compress(status: &RunStatus) -> CompressedRunStatus {
    let stages = Stage::ALL
        .into_iter()
        .map(|stage| {
            // max_by_key keeps the last of equal timestamps, i.e. the later append.
            let latest = status
                .history
                .iter()
                .filter(|e| e.stage == stage && e.status != StageStatus::Skip)
                .max_by_key(|e| e.timestamp)
                .cloned();
            (stage, latest)
        })
        .collect();

    CompressedRunStatus {
        date: status.date,
        logfile: status.logfile.clone(),
        stages,
    }
}

/// Location of the ledger for `mjd` under `log_root`.
pub fn ledger_path(log_root: &Path, mjd: Mjd) -> PathBuf {
    log_root
        .join(mjd.to_string())
        .join(format!("{}_status.json", mjd))
}

/// Compressed records for every night under `log_root`, newest first.
///
/// `current` replaces whatever is on disk for its own night, so a run can
/// include its unsaved state. Missing or unreadable sibling records are
/// skipped with a warning.
pub fn aggregate_across_runs(
    log_root: &Path,
    current: Option<&RunStatus>,
) -> Vec<CompressedRunStatus> {
    let mut records: Vec<CompressedRunStatus> = current.map(compress).into_iter().collect();

    let entries = match std::fs::read_dir(log_root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {}: {}", log_root.display(), e);
            return records;
        }
    };

    for entry in entries.filter_map(Result::ok) {
        let Some(mjd) = entry
            .file_name()
            .to_str()
            .filter(|name| name.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|name| name.parse::<Mjd>().ok())
        else {
            continue;
        };
        if current.is_some_and(|c| c.date == mjd) {
            continue;
        }

        let path = ledger_path(log_root, mjd);
        if !path.exists() {
            continue;
        }
        match read_status(&path) {
            Ok(status) => records.push(compress(&status)),
            Err(e) => warn!("Skipping ledger {}: {}", path.display(), e),
        }
    }

    records.sort_by(|a, b| b.date.cmp(&a.date));
    records
}

fn read_status(path: &Path) -> Result<RunStatus, LedgerError> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|source| LedgerError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// The ledger of the current run.
#[derive(Debug)]
pub struct StatusLedger {
    log_root: PathBuf,
    path: PathBuf,
    status: RunStatus,
    /// Content as last read from or written to disk.
    persisted: Option<RunStatus>,
}

impl StatusLedger {
    /// Loads the record for `mjd`, or starts an empty one.
    pub fn load(log_root: impl Into<PathBuf>, mjd: Mjd) -> Result<Self, LedgerError> {
        let log_root = log_root.into();
        let path = ledger_path(&log_root, mjd);

        let (status, persisted) = if path.exists() {
            let status = read_status(&path)?;
            debug!("Loaded {} entries from {}", status.history.len(), path.display());
            (status.clone(), Some(status))
        } else {
            (RunStatus::new(mjd), None)
        };

        Ok(Self {
            log_root,
            path,
            status,
            persisted,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.status.history
    }

    /// Records the report reference; `None` leaves an earlier value in place.
    pub fn set_logfile(&mut self, logfile: Option<String>) {
        if logfile.is_some() {
            self.status.logfile = logfile;
        }
    }

    /// Appends one outcome for `stage`.
    pub fn append(&mut self, stage: Stage, status: StageStatus) {
        let timestamp = self.next_timestamp();
        self.status.history.push(HistoryEntry {
            stage,
            status,
            timestamp,
        });
    }

    /// Appends the start-of-run intent: `incomplete` for every enabled stage
    /// and `skip` for the rest. Does nothing when no stage is enabled.
    pub fn mark_intent(&mut self, selection: &StageSelection) {
        if !selection.any() {
            return;
        }
        let timestamp = self.next_timestamp();
        for stage in Stage::ALL {
            let status = if selection.is_enabled(stage) {
                StageStatus::Incomplete
            } else {
                StageStatus::Skip
            };
            self.status.history.push(HistoryEntry {
                stage,
                status,
                timestamp,
            });
        }
    }

    /// True when in-memory content differs from what is on disk.
    pub fn is_dirty(&self) -> bool {
        self.persisted.as_ref() != Some(&self.status)
    }

    /// Writes the record if it changed. Returns whether a write happened.
    ///
    /// The file is replaced atomically through a temporary file in the same
    /// directory, so a crash mid-write never leaves a truncated ledger.
    pub fn save(&mut self) -> Result<bool, LedgerError> {
        if !self.is_dirty() {
            debug!("NO CHANGE TO {}", self.path.display());
            return Ok(false);
        }

        let parent = self.path.parent().unwrap_or(&self.log_root);
        std::fs::create_dir_all(parent)?;

        let json = serde_json::to_string_pretty(&self.status)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path).map_err(|e| LedgerError::Io(e.error))?;

        info!("UPDATE {}", self.path.display());
        self.persisted = Some(self.status.clone());
        Ok(true)
    }

    pub fn compressed(&self) -> CompressedRunStatus {
        compress(&self.status)
    }

    /// Dashboard feed: this run plus every sibling under the log root.
    pub fn aggregate_across_runs(&self) -> Vec<CompressedRunStatus> {
        aggregate_across_runs(&self.log_root, Some(&self.status))
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.status.history.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        }
    }
}
