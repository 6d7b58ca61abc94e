//! Core types shared by the controller, the ledger and the stage runners.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Modified Julian Date identifying one observing night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mjd(pub u32);

impl Mjd {
    /// Offset between the Unix epoch and MJD 0, in days.
    const UNIX_EPOCH_MJD: f64 = 40587.0;

    /// Returns the MJD for the current wall-clock time.
    pub fn today() -> Self {
        let seconds = chrono::Utc::now().timestamp() as f64;
        Self::from_unix_seconds(seconds)
    }

    /// Converts Unix seconds to an MJD, truncating the fractional day.
    pub fn from_unix_seconds(seconds: f64) -> Self {
        Mjd((seconds / 86400.0 + Self::UNIX_EPOCH_MJD) as u32)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Mjd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Mjd {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Mjd)
    }
}

/// One phase of the fixed transfer sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Report,
    Download,
    Verify,
    Copy,
    Mirror,
    Backup,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Report,
        Stage::Download,
        Stage::Verify,
        Stage::Copy,
        Stage::Mirror,
        Stage::Backup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Report => "report",
            Stage::Download => "download",
            Stage::Verify => "verify",
            Stage::Copy => "copy",
            Stage::Mirror => "mirror",
            Stage::Backup => "backup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown stage: {}", s))
    }
}

/// Outcome recorded for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Not yet considered.
    Pending,
    /// Enabled but not yet executed; placeholder written at pipeline start.
    Incomplete,
    /// Not selected for this run.
    Skip,
    Success,
    Failure,
}

impl StageStatus {
    /// Returns true for statuses that end a stage attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Success | StageStatus::Failure | StageStatus::Skip
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Incomplete => "incomplete",
            StageStatus::Skip => "skip",
            StageStatus::Success => "success",
            StageStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stages the operator selected for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageSelection {
    pub report: bool,
    pub download: bool,
    pub verify: bool,
    pub copy: bool,
    pub mirror: bool,
    pub backup: bool,
}

impl StageSelection {
    /// Selects every stage.
    pub fn all() -> Self {
        Self {
            report: true,
            download: true,
            verify: true,
            copy: true,
            mirror: true,
            backup: true,
        }
    }

    /// Selects only the given stages.
    pub fn only(stages: &[Stage]) -> Self {
        let mut selection = Self::default();
        for stage in stages {
            selection.set(*stage, true);
        }
        selection
    }

    pub fn is_enabled(&self, stage: Stage) -> bool {
        match stage {
            Stage::Report => self.report,
            Stage::Download => self.download,
            Stage::Verify => self.verify,
            Stage::Copy => self.copy,
            Stage::Mirror => self.mirror,
            Stage::Backup => self.backup,
        }
    }

    pub fn set(&mut self, stage: Stage, enabled: bool) {
        match stage {
            Stage::Report => self.report = enabled,
            Stage::Download => self.download = enabled,
            Stage::Verify => self.verify = enabled,
            Stage::Copy => self.copy = enabled,
            Stage::Mirror => self.mirror = enabled,
            Stage::Backup => self.backup = enabled,
        }
    }

    /// Enabled stages in execution order.
    pub fn enabled(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| self.is_enabled(*stage))
            .collect()
    }

    pub fn any(&self) -> bool {
        Stage::ALL.iter().any(|stage| self.is_enabled(*stage))
    }

    /// An empty selection means "run everything".
    pub fn or_all(self) -> Self {
        if self.any() {
            self
        } else {
            Self::all()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mjd_from_unix_seconds() {
        assert_eq!(Mjd::from_unix_seconds(0.0), Mjd(40587));
        // 2023-01-01T00:00:00Z
        assert_eq!(Mjd::from_unix_seconds(1_672_531_200.0), Mjd(59945));
    }

    #[test]
    fn test_stage_order_and_names() {
        let names: Vec<&str> = Stage::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            vec!["report", "download", "verify", "copy", "mirror", "backup"]
        );
        assert_eq!("Verify".parse::<Stage>().unwrap(), Stage::Verify);
        assert!("archive".parse::<Stage>().is_err());
    }

    #[test]
    fn test_status_serde_lowercase() {
        let json = serde_json::to_string(&StageStatus::Incomplete).unwrap();
        assert_eq!(json, "\"incomplete\"");
        assert!(StageStatus::Skip.is_terminal());
        assert!(!StageStatus::Incomplete.is_terminal());
    }

    #[test]
    fn test_selection_defaults_to_all() {
        let selection = StageSelection::default().or_all();
        assert_eq!(selection, StageSelection::all());

        let selection = StageSelection::only(&[Stage::Download, Stage::Copy]).or_all();
        assert_eq!(selection.enabled(), vec![Stage::Download, Stage::Copy]);
    }
}
