//! Run notifications
//!
//! The orchestrator reports through an [`AnalysisListener`]. All
//! notifications of one run go through a [`ProgressReporter`], which holds
//! the ordering rules:
//! - a stage change precedes any progress of that stage
//! - progress never decreases, also across recovery attempts
//! - exactly one terminal notification, and nothing after it

use crate::models::{AnalysisStage, CombinedResult, RunState, RunStatus};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

/// Receiver of run notifications
///
/// Called synchronously from the orchestrator task; implementations should
/// return quickly.
pub trait AnalysisListener: Send + Sync {
    /// Overall progress (0-100) with a short status message
    fn on_progress(&self, _percent: u8, _message: &str) {}

    fn on_stage_changed(&self, _stage: AnalysisStage) {}

    /// A failure was recovered from; may fire several times per run
    fn on_error(&self, _message: &str) {}

    fn on_completed(&self, _result: &CombinedResult) {}

    fn on_cancelled(&self) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl AnalysisListener for NoopListener {}

/// Run notification as a value, for channel consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnalysisEvent {
    Progress {
        percent: u8,
        message: String,
    },
    StageChanged {
        stage: AnalysisStage,
    },
    Error {
        message: String,
    },
    Completed {
        result: Box<CombinedResult>,
    },
    Cancelled,
}

impl AnalysisEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Cancelled)
    }
}

/// Forwards notifications as [`AnalysisEvent`]s over a tokio channel
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<AnalysisEvent>,
}

impl ChannelListener {
    pub fn new(tx: mpsc::UnboundedSender<AnalysisEvent>) -> Self {
        Self { tx }
    }

    /// Listener plus the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AnalysisEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: AnalysisEvent) {
        if self.tx.send(event).is_err() {
            debug!("Analysis event receiver dropped");
        }
    }
}

impl AnalysisListener for ChannelListener {
    fn on_progress(&self, percent: u8, message: &str) {
        self.send(AnalysisEvent::Progress {
            percent,
            message: message.to_string(),
        });
    }

    fn on_stage_changed(&self, stage: AnalysisStage) {
        self.send(AnalysisEvent::StageChanged { stage });
    }

    fn on_error(&self, message: &str) {
        self.send(AnalysisEvent::Error {
            message: message.to_string(),
        });
    }

    fn on_completed(&self, result: &CombinedResult) {
        self.send(AnalysisEvent::Completed {
            result: Box::new(result.clone()),
        });
    }

    fn on_cancelled(&self) {
        self.send(AnalysisEvent::Cancelled);
    }
}

#[derive(Debug, Default)]
struct ReporterState {
    stage: Option<AnalysisStage>,
    percent: Option<u8>,
    terminal: bool,
}

/// Ordered notification gate for one run
///
/// Also mirrors stage, progress and status into the shared [`RunState`].
pub struct ProgressReporter {
    listener: Arc<dyn AnalysisListener>,
    run_state: Arc<Mutex<RunState>>,
    state: Mutex<ReporterState>,
}

impl ProgressReporter {
    pub fn new(listener: Arc<dyn AnalysisListener>, run_state: Arc<Mutex<RunState>>) -> Self {
        Self {
            listener,
            run_state,
            state: Mutex::new(ReporterState::default()),
        }
    }

    /// Enter `stage` and report its starting progress
    ///
    /// Re-entering the current or an earlier stage (recovery attempts) emits
    /// nothing.
    pub fn enter_stage(&self, stage: AnalysisStage) {
        self.progress(stage, 0.0);
    }

    /// Report stage-local progress (0-100)
    pub fn progress(&self, stage: AnalysisStage, local_percent: f32) {
        let mut state = lock(&self.state);
        if state.terminal {
            return;
        }
        if state.stage.is_some_and(|current| stage < current) {
            return;
        }

        if state.stage != Some(stage) {
            state.stage = Some(stage);
            lock(&self.run_state).enter_stage(stage);
            self.listener.on_stage_changed(stage);
        }

        let overall = stage.overall_progress(local_percent);
        let percent = overall.floor() as u8;
        if state.percent.map_or(true, |last| percent > last) {
            state.percent = Some(percent);
            lock(&self.run_state).set_progress(overall);
            self.listener.on_progress(percent, stage.label());
        }
    }

    /// Report a recovered failure
    pub fn error(&self, message: &str) {
        let state = lock(&self.state);
        if state.terminal {
            return;
        }
        lock(&self.run_state).record_error(message);
        self.listener.on_error(message);
    }

    /// Terminal success notification
    pub fn completed(&self, result: &CombinedResult) -> bool {
        let mut state = lock(&self.state);
        if state.terminal {
            return false;
        }
        if state.stage != Some(AnalysisStage::Finalizing) {
            state.stage = Some(AnalysisStage::Finalizing);
            lock(&self.run_state).enter_stage(AnalysisStage::Finalizing);
            self.listener.on_stage_changed(AnalysisStage::Finalizing);
        }
        if state.percent != Some(100) {
            state.percent = Some(100);
            self.listener
                .on_progress(100, AnalysisStage::Finalizing.label());
        }
        state.terminal = true;
        lock(&self.run_state).finish(RunStatus::Completed);
        self.listener.on_completed(result);
        true
    }

    /// Terminal cancellation notification
    pub fn cancelled(&self) -> bool {
        let mut state = lock(&self.state);
        if state.terminal {
            return false;
        }
        state.terminal = true;
        lock(&self.run_state).finish(RunStatus::Cancelled);
        self.listener.on_cancelled();
        true
    }

    /// Terminal failure: the error message is the last notification
    pub fn failed(&self, message: &str) -> bool {
        let mut state = lock(&self.state);
        if state.terminal {
            return false;
        }
        state.terminal = true;
        {
            let mut run_state = lock(&self.run_state);
            run_state.record_error(message);
            run_state.finish(RunStatus::Failed);
        }
        self.listener.on_error(message);
        true
    }
}

/// Lock, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::ResultFusion;
    use crate::models::AnalysisStage::*;

    fn reporter() -> (
        ProgressReporter,
        mpsc::UnboundedReceiver<AnalysisEvent>,
        Arc<Mutex<RunState>>,
    ) {
        let (listener, rx) = ChannelListener::channel();
        let run_state = Arc::new(Mutex::new(RunState::new()));
        (
            ProgressReporter::new(Arc::new(listener), run_state.clone()),
            rx,
            run_state,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AnalysisEvent>) -> Vec<AnalysisEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_stage_change_precedes_progress() {
        let (reporter, mut rx, _) = reporter();
        reporter.enter_stage(Initializing);
        reporter.enter_stage(Preprocessing);

        let events = drain(&mut rx);
        assert_eq!(events[0], AnalysisEvent::StageChanged { stage: Initializing });
        assert!(matches!(events[1], AnalysisEvent::Progress { percent: 0, .. }));
        assert_eq!(events[2], AnalysisEvent::StageChanged { stage: Preprocessing });
        assert!(matches!(events[3], AnalysisEvent::Progress { percent: 10, .. }));
    }

    #[test]
    fn test_retry_never_moves_backwards() {
        let (reporter, mut rx, run_state) = reporter();
        reporter.enter_stage(Initializing);
        reporter.progress(ClassifierAnalysis, 50.0);
        drain(&mut rx);

        reporter.enter_stage(Preprocessing);
        reporter.progress(ClassifierAnalysis, 25.0);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(run_state.lock().unwrap().progress, 50.0);

        reporter.progress(ClassifierAnalysis, 75.0);
        assert_eq!(
            drain(&mut rx),
            vec![AnalysisEvent::Progress {
                percent: 60,
                message: ClassifierAnalysis.label().to_string()
            }]
        );
    }

    #[test]
    fn test_single_terminal_notification() {
        let (reporter, mut rx, run_state) = reporter();
        reporter.enter_stage(Initializing);
        assert!(reporter.cancelled());
        assert!(!reporter.cancelled());

        let result = ResultFusion::new().degraded_result(&crate::AnalysisError::Timeout, 1);
        assert!(!reporter.completed(&result));
        reporter.progress(Finalizing, 100.0);
        reporter.error("late");

        let events = drain(&mut rx);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(events.last(), Some(&AnalysisEvent::Cancelled));
        assert!(run_state.lock().unwrap().is_cancelled());
    }

    #[test]
    fn test_completed_reaches_100() {
        let (reporter, mut rx, run_state) = reporter();
        reporter.enter_stage(Initializing);
        reporter.progress(FeatureAnalysis, 100.0);

        let result = ResultFusion::new().degraded_result(&crate::AnalysisError::Timeout, 1);
        assert!(reporter.completed(&result));

        let events = drain(&mut rx);
        let n = events.len();
        assert_eq!(events[n - 3], AnalysisEvent::StageChanged { stage: Finalizing });
        assert!(matches!(events[n - 2], AnalysisEvent::Progress { percent: 100, .. }));
        assert!(matches!(events[n - 1], AnalysisEvent::Completed { .. }));
        assert!(run_state.lock().unwrap().is_completed());
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_string(&AnalysisEvent::StageChanged {
            stage: FeatureAnalysis,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"StageChanged","stage":"FEATURE_ANALYSIS"}"#);
    }
}
