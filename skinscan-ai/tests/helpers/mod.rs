//! Test Helper Utilities
//!
//! Scripted analyzers, a recording listener and orchestrator setup shared by
//! the skinscan-ai integration tests.

#![allow(dead_code)]

use image::DynamicImage;
use skinscan_ai::analyzers::{FeatureAnalyzer, LesionClassifier};
use skinscan_ai::memory::{MemoryProbe, MemorySample};
use skinscan_ai::models::{
    AnalysisStage, ClassifierScore, CombinedResult, FeatureFindings, FeatureOutput, FeatureScores,
    LesionImage,
};
use skinscan_ai::{
    AnalysisListener, AnalyzerFailure, DeviceProfile, DeviceProfiler, Orchestrator,
    OrchestratorBuilder, RecoveryPolicy,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Medium-tier profile: device adjustment leaves configs unchanged
pub fn medium_device() -> DeviceProfile {
    DeviceProfiler::profile(4, 1024 * MIB)
}

/// Recovery policy with short retry delays
pub fn fast_policy() -> RecoveryPolicy {
    RecoveryPolicy {
        base_retry_delay: Duration::from_millis(5),
        ..RecoveryPolicy::default()
    }
}

pub fn test_image(width: u32, height: u32) -> LesionImage {
    LesionImage::from_image(DynamicImage::new_rgb8(width, height))
}

pub fn score(probability: f64, confidence: f64) -> ClassifierScore {
    ClassifierScore {
        probability,
        confidence,
    }
}

/// Feature output whose aggregate is `total` (3.0-5.5) and that triggers no
/// fusion adjustment or danger indicator
pub fn feature_output(total: f64) -> FeatureOutput {
    // asymmetry, border and diameter contribute 2.5; color supplies the rest
    let color = ((total - 2.5) / 0.5).clamp(1.0, 6.0);
    FeatureOutput::from_scores(
        FeatureScores {
            asymmetry: 1.0,
            border: 2.0,
            color,
            diameter: 2.0,
            evolution: None,
        },
        FeatureFindings {
            asymmetry: "Mild asymmetry".to_string(),
            border: "Mostly regular border".to_string(),
            color: format!("{} colors", color),
            diameter: "Small".to_string(),
            ..Default::default()
        },
    )
}

/// One scripted analyzer response
#[derive(Clone)]
pub struct Step<T> {
    pub delay: Duration,
    pub result: Result<T, AnalyzerFailure>,
}

impl<T> Step<T> {
    pub fn ok(value: T) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(value),
        }
    }

    pub fn fail(failure: AnalyzerFailure) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(failure),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Replays queued steps, then repeats the fallback step
pub struct Script<T: Clone> {
    queue: Mutex<VecDeque<Step<T>>>,
    fallback: Step<T>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    order: Option<Arc<Mutex<Vec<&'static str>>>>,
}

impl<T: Clone> Script<T> {
    pub fn new(fallback: Step<T>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            order: None,
        }
    }

    pub fn then(self, step: Step<T>) -> Self {
        self.queue.lock().unwrap().push_back(step);
        self
    }

    pub fn with_order_log(mut self, log: Arc<Mutex<Vec<&'static str>>>) -> Self {
        self.order = Some(log);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls ever in progress at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn play(&self, label: &'static str) -> Result<T, AnalyzerFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(log) = &self.order {
            log.lock().unwrap().push(label);
        }

        let step = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        if !step.delay.is_zero() {
            std::thread::sleep(step.delay);
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        step.result
    }
}

pub struct ScriptedClassifier {
    pub script: Script<ClassifierScore>,
}

impl ScriptedClassifier {
    pub fn new(script: Script<ClassifierScore>) -> Arc<Self> {
        Arc::new(Self { script })
    }

    pub fn always(probability: f64) -> Arc<Self> {
        Self::new(Script::new(Step::ok(score(probability, 0.9))))
    }
}

impl LesionClassifier for ScriptedClassifier {
    fn classify(&self, _image: &LesionImage) -> Result<ClassifierScore, AnalyzerFailure> {
        self.script.play("classifier")
    }
}

pub struct ScriptedFeatures {
    pub script: Script<FeatureOutput>,
    /// (pixel count, pixel density, had previous image) per call
    pub seen: Mutex<Vec<(u64, f32, bool)>>,
}

impl ScriptedFeatures {
    pub fn new(script: Script<FeatureOutput>) -> Arc<Self> {
        Arc::new(Self {
            script,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn always(total: f64) -> Arc<Self> {
        Self::new(Script::new(Step::ok(feature_output(total))))
    }

    pub fn seen(&self) -> Vec<(u64, f32, bool)> {
        self.seen.lock().unwrap().clone()
    }
}

impl FeatureAnalyzer for ScriptedFeatures {
    fn analyze(
        &self,
        image: &LesionImage,
        previous: Option<&LesionImage>,
        pixel_density: f32,
    ) -> Result<FeatureOutput, AnalyzerFailure> {
        self.seen
            .lock()
            .unwrap()
            .push((image.pixel_count(), pixel_density, previous.is_some()));
        self.script.play("features")
    }
}

/// Listener notification as recorded by [`RecordingListener`]
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Progress(u8),
    Stage(AnalysisStage),
    Error(String),
    Completed { degraded: bool, attempts: u32 },
    Cancelled,
}

impl Recorded {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Cancelled)
    }
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Recorded) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }

    /// Poll until `predicate` matches a recorded event
    pub async fn wait_for(&self, predicate: impl Fn(&Recorded) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.events().iter().any(&predicate) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("event never recorded");
    }

    fn push(&self, event: Recorded) {
        self.events.lock().unwrap().push(event);
    }
}

impl AnalysisListener for RecordingListener {
    fn on_progress(&self, percent: u8, _message: &str) {
        self.push(Recorded::Progress(percent));
    }

    fn on_stage_changed(&self, stage: AnalysisStage) {
        self.push(Recorded::Stage(stage));
    }

    fn on_error(&self, message: &str) {
        self.push(Recorded::Error(message.to_string()));
    }

    fn on_completed(&self, result: &CombinedResult) {
        self.push(Recorded::Completed {
            degraded: result.degraded,
            attempts: result.attempts,
        });
    }

    fn on_cancelled(&self) {
        self.push(Recorded::Cancelled);
    }
}

/// Fixed memory reading
pub struct FixedProbe {
    pub used_bytes: u64,
    pub max_bytes: u64,
}

impl MemoryProbe for FixedProbe {
    fn sample(&self) -> MemorySample {
        MemorySample {
            used_bytes: self.used_bytes,
            max_bytes: self.max_bytes,
        }
    }
}

/// Builder with a medium device, fast retries and the given listener
pub fn builder(
    classifier: Arc<ScriptedClassifier>,
    features: Arc<ScriptedFeatures>,
    listener: Arc<RecordingListener>,
) -> OrchestratorBuilder {
    Orchestrator::builder(classifier, features)
        .listener(listener)
        .device_profile(medium_device())
        .recovery_policy(fast_policy())
}

/// Check the ordering rules every run must satisfy
pub fn assert_well_ordered(events: &[Recorded]) {
    let mut last_stage: Option<AnalysisStage> = None;
    let mut last_percent: Option<u8> = None;
    let mut terminal_seen = false;

    for event in events {
        assert!(!terminal_seen, "notification after terminal: {:?}", event);
        match event {
            Recorded::Stage(stage) => {
                if let Some(previous) = last_stage {
                    assert!(*stage > previous, "stage went from {:?} to {:?}", previous, stage);
                }
                last_stage = Some(*stage);
            }
            Recorded::Progress(percent) => {
                assert!(last_stage.is_some(), "progress before any stage");
                assert!(*percent <= 100);
                let stage = last_stage.unwrap();
                assert!(
                    *percent >= stage.cumulative_weight() as u8,
                    "progress {} below start of {:?}",
                    percent,
                    stage
                );
                if let Some(previous) = last_percent {
                    assert!(*percent >= previous, "progress went from {} to {}", previous, percent);
                }
                last_percent = Some(*percent);
            }
            Recorded::Completed { .. } | Recorded::Cancelled => terminal_seen = true,
            Recorded::Error(_) => {}
        }
    }
}
