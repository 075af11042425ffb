//! Analysis stage state machine
//!
//! A run progresses through five weighted stages:
//! INITIALIZING → PREPROCESSING → CLASSIFIER_ANALYSIS → FEATURE_ANALYSIS → FINALIZING

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stage with its fixed share of overall progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStage {
    /// Validation, device adjustment
    Initializing,
    /// Memory check, downscaling
    Preprocessing,
    /// Learned classifier
    ClassifierAnalysis,
    /// Rule-based dermoscopic feature analysis
    FeatureAnalysis,
    /// Fusion and result assembly
    Finalizing,
}

impl AnalysisStage {
    /// All stages in pipeline order
    pub const ALL: [AnalysisStage; 5] = [
        AnalysisStage::Initializing,
        AnalysisStage::Preprocessing,
        AnalysisStage::ClassifierAnalysis,
        AnalysisStage::FeatureAnalysis,
        AnalysisStage::Finalizing,
    ];

    /// Share of overall progress (weights sum to 100)
    pub fn weight(self) -> u32 {
        match self {
            Self::Initializing => 10,
            Self::Preprocessing => 20,
            Self::ClassifierAnalysis => 40,
            Self::FeatureAnalysis => 25,
            Self::Finalizing => 5,
        }
    }

    /// Sum of the weights of all preceding stages
    pub fn cumulative_weight(self) -> u32 {
        Self::ALL
            .iter()
            .take_while(|s| **s != self)
            .map(|s| s.weight())
            .sum()
    }

    /// Overall progress for a stage-local progress value (0-100)
    pub fn overall_progress(self, local_percent: f32) -> f32 {
        let local = local_percent.clamp(0.0, 100.0);
        (self.cumulative_weight() as f32 + local * self.weight() as f32 / 100.0).min(100.0)
    }

    /// Human-readable label for progress messages
    pub fn label(self) -> &'static str {
        match self {
            Self::Initializing => "Initializing analysis",
            Self::Preprocessing => "Preparing image",
            Self::ClassifierAnalysis => "Running image classifier",
            Self::FeatureAnalysis => "Analyzing lesion features",
            Self::Finalizing => "Combining results",
        }
    }
}

/// Terminal/non-terminal status of a run (exactly one holds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Per-run state, discarded when the run ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub stage: AnalysisStage,
    /// Overall progress (0.0 - 100.0)
    pub progress: f32,
    pub status: RunStatus,
    /// User-facing message of the last error, if any
    pub error: Option<String>,
    /// Current attempt (1-based)
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            stage: AnalysisStage::Initializing,
            progress: 0.0,
            status: RunStatus::Running,
            error: None,
            attempt: 1,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn enter_stage(&mut self, stage: AnalysisStage) {
        self.stage = stage;
    }

    /// Record progress; never moves backwards
    pub fn set_progress(&mut self, progress: f32) {
        self.progress = self.progress.max(progress.clamp(0.0, 100.0));
    }

    pub fn record_error(&mut self, message: &str) {
        self.error = Some(message.to_string());
    }

    /// Move to a terminal status
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        if status == RunStatus::Completed {
            self.progress = 100.0;
        }
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RunStatus::Running
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_100() {
        let total: u32 = AnalysisStage::ALL.iter().map(|s| s.weight()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_cumulative_weights() {
        assert_eq!(AnalysisStage::Initializing.cumulative_weight(), 0);
        assert_eq!(AnalysisStage::Preprocessing.cumulative_weight(), 10);
        assert_eq!(AnalysisStage::ClassifierAnalysis.cumulative_weight(), 30);
        assert_eq!(AnalysisStage::FeatureAnalysis.cumulative_weight(), 70);
        assert_eq!(AnalysisStage::Finalizing.cumulative_weight(), 95);

        for (i, stage) in AnalysisStage::ALL.iter().enumerate() {
            let preceding: u32 = AnalysisStage::ALL[..i].iter().map(|s| s.weight()).sum();
            assert_eq!(stage.cumulative_weight(), preceding);
        }
    }

    #[test]
    fn test_overall_progress() {
        assert_eq!(AnalysisStage::ClassifierAnalysis.overall_progress(0.0), 30.0);
        assert_eq!(AnalysisStage::ClassifierAnalysis.overall_progress(50.0), 50.0);
        assert_eq!(AnalysisStage::Finalizing.overall_progress(100.0), 100.0);
        assert_eq!(AnalysisStage::Preprocessing.overall_progress(250.0), 30.0);
    }

    #[test]
    fn test_run_state_progress_is_monotonic() {
        let mut state = RunState::new();
        state.set_progress(40.0);
        state.set_progress(20.0);
        assert_eq!(state.progress, 40.0);
    }

    #[test]
    fn test_run_state_single_status() {
        let mut state = RunState::new();
        assert!(!state.is_terminal());

        state.finish(RunStatus::Cancelled);
        assert!(state.is_terminal());
        assert!(state.is_cancelled());
        assert!(!state.is_completed());
        assert!(state.ended_at.is_some());
    }
}
