//! Explicit fail-fast state threaded through the controller.

use crate::pipeline::{Stage, StageStatus};

/// The first stage failure of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub reason: String,
}

/// Outcomes so far and whether later stages may still run.
///
/// Readiness is derived, never set: the run is ready until the first
/// failure is recorded, and stays not-ready for the rest of the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineState {
    completed: Vec<(Stage, StageStatus)>,
    last_error: Option<StageFailure>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.last_error.is_none()
    }

    /// Records a stage outcome; a failure ends readiness.
    pub fn record(&mut self, stage: Stage, status: StageStatus, reason: impl Into<String>) {
        self.completed.push((stage, status));
        if status == StageStatus::Failure && self.last_error.is_none() {
            self.last_error = Some(StageFailure {
                stage,
                reason: reason.into(),
            });
        }
    }

    /// Records an outcome that never affects readiness.
    pub fn record_advisory(&mut self, stage: Stage, status: StageStatus) {
        self.completed.push((stage, status));
    }

    pub fn completed(&self) -> &[(Stage, StageStatus)] {
        &self.completed
    }

    pub fn status_of(&self, stage: Stage) -> Option<StageStatus> {
        self.completed
            .iter()
            .rev()
            .find(|(s, _)| *s == stage)
            .map(|(_, status)| *status)
    }

    pub fn last_error(&self) -> Option<&StageFailure> {
        self.last_error.as_ref()
    }

    /// True once a non-advisory stage has failed.
    pub fn has_failure(&self) -> bool {
        self.last_error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_until_first_failure() {
        let mut state = PipelineState::new();
        assert!(state.is_ready());

        state.record(Stage::Download, StageStatus::Success, "");
        assert!(state.is_ready());

        state.record(Stage::Verify, StageStatus::Failure, "checksum mismatch");
        assert!(!state.is_ready());

        state.record(Stage::Copy, StageStatus::Failure, "second");
        let failure = state.last_error().unwrap();
        assert_eq!(failure.stage, Stage::Verify);
        assert_eq!(failure.reason, "checksum mismatch");
        assert!(state.has_failure());
    }

    #[test]
    fn test_advisory_failure_keeps_ready() {
        let mut state = PipelineState::new();
        state.record_advisory(Stage::Report, StageStatus::Failure);
        assert!(state.is_ready());
        assert!(!state.has_failure());
        assert_eq!(state.status_of(Stage::Report), Some(StageStatus::Failure));
    }

    #[test]
    fn test_status_of_latest() {
        let mut state = PipelineState::new();
        state.record(Stage::Report, StageStatus::Failure, "");
        state.record(Stage::Report, StageStatus::Success, "");
        assert_eq!(state.status_of(Stage::Report), Some(StageStatus::Success));
        assert_eq!(state.status_of(Stage::Backup), None);
        assert_eq!(state.completed().len(), 2);
    }
}
