//! Analysis run orchestration
//!
//! Pipeline per run:
//! 1. Validate configuration and images
//! 2. Adjust configuration to the device profile
//! 3. Memory check, downscale to the resolution ceiling or memory budget
//! 4. Analysis stage under the total timeout
//! 5. Fusion
//! 6. Completion notification
//!
//! Failures in steps 2-5 are classified and handed to the recovery planner.
//! A plan re-enters the pipeline at step 2 with the transformed
//! configuration; no plan yields the degraded fallback result. Only one run
//! executes at a time per orchestrator, later callers wait for the lock.

pub mod analysis;

use crate::analyzers::{FeatureAnalyzer, LesionClassifier};
use crate::config::{AnalysisConfig, RecoveryPolicy};
use crate::device::DeviceProfile;
use crate::error::{AnalysisError, AnalysisResult};
use crate::events::{lock, AnalysisListener, NoopListener, ProgressReporter};
use crate::fusion::ResultFusion;
use crate::memory::{ImagePool, ImagePoolProbe, MemoryGuard, MemoryProbe, MemoryStatus};
use crate::models::{AnalysisRequest, AnalysisStage, CombinedResult, LesionImage, RunState};
use crate::recovery::RecoveryPlanner;
use crate::worker_pool::{TaskOutcome, WorkerPool};
use analysis::{checkpoint, AnalyzerRun};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use analysis::AnalysisOutputs;

/// Clears the image pool when a run ends, however it ends
struct RunScope<'a> {
    pool: &'a ImagePool,
}

impl Drop for RunScope<'_> {
    fn drop(&mut self) {
        let released = self.pool.clear();
        debug!(released, "Run image pool cleared");
    }
}

/// Per-run values shared by every attempt
struct RunContext {
    run_id: Uuid,
    cancel: CancellationToken,
    reporter: ProgressReporter,
}

/// Runs lesion analyses end to end
pub struct Orchestrator {
    classifier: Arc<dyn LesionClassifier>,
    feature_analyzer: Arc<dyn FeatureAnalyzer>,
    listener: Arc<dyn AnalysisListener>,
    device: Arc<DeviceProfile>,
    memory: Arc<MemoryGuard>,
    planner: RecoveryPlanner,
    fusion: ResultFusion,
    workers: WorkerPool,
    run_lock: tokio::sync::Mutex<()>,
    /// Parent of the tokens of the active run and of runs waiting for the lock
    cancel: Mutex<CancellationToken>,
    run_state: Arc<Mutex<RunState>>,
}

impl Orchestrator {
    pub fn builder(
        classifier: Arc<dyn LesionClassifier>,
        feature_analyzer: Arc<dyn FeatureAnalyzer>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            classifier,
            feature_analyzer,
            listener: None,
            device: None,
            probe: None,
            policy: RecoveryPolicy::default(),
        }
    }

    pub fn device_profile(&self) -> &DeviceProfile {
        &self.device
    }

    pub fn worker_pool_size(&self) -> usize {
        self.workers.size()
    }

    /// Snapshot of the current or most recent run
    pub fn run_state(&self) -> RunState {
        lock(&self.run_state).clone()
    }

    /// Request cancellation of the active run and of runs waiting to start
    ///
    /// Idempotent and callable from any thread. The active run stops at its
    /// next checkpoint, waiting runs end as cancelled once they get the lock.
    /// Runs started after this call are not affected.
    pub fn cancel(&self) {
        let mut token = lock(&self.cancel);
        info!("Analysis cancellation requested");
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Analyze one request
    ///
    /// Returns the fused verdict, a degraded verdict when recovery is
    /// exhausted, or the error of a non-recoverable failure or cancellation.
    pub async fn run(
        &self,
        request: AnalysisRequest,
        config: AnalysisConfig,
    ) -> AnalysisResult<CombinedResult> {
        let cancel = lock(&self.cancel).child_token();
        let _run_guard = self.run_lock.lock().await;

        let run_id = {
            let mut state = lock(&self.run_state);
            *state = RunState::new();
            state.run_id
        };
        let _scope = RunScope {
            pool: self.memory.pool(),
        };
        let ctx = RunContext {
            run_id,
            cancel,
            reporter: ProgressReporter::new(self.listener.clone(), self.run_state.clone()),
        };

        info!(
            run_id = %run_id,
            width = request.image.width(),
            height = request.image.height(),
            has_previous = request.previous_image.is_some(),
            "Analysis run started"
        );

        match self.execute(&ctx, request, config).await {
            Ok(result) => {
                ctx.reporter.completed(&result);
                info!(
                    run_id = %run_id,
                    attempts = result.attempts,
                    risk = ?result.risk,
                    urgency = ?result.urgency,
                    degraded = result.degraded,
                    "Analysis run completed"
                );
                Ok(result)
            }
            Err(AnalysisError::UserCancellation) => {
                ctx.reporter.cancelled();
                info!(run_id = %run_id, "Analysis run cancelled");
                Err(AnalysisError::UserCancellation)
            }
            Err(e) => {
                ctx.reporter.failed(e.user_message());
                error!(
                    run_id = %run_id,
                    error = e.kind_name(),
                    detail = e.detail().unwrap_or(""),
                    "Analysis run failed"
                );
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        request: AnalysisRequest,
        config: AnalysisConfig,
    ) -> AnalysisResult<CombinedResult> {
        checkpoint(&ctx.cancel)?;
        ctx.reporter.enter_stage(AnalysisStage::Initializing);

        config.validate()?;
        request.image.validate("image")?;
        if let Some(previous) = &request.previous_image {
            previous.validate("previous image")?;
        }

        let AnalysisRequest {
            image,
            previous_image,
        } = request;
        let mut config = config;
        let mut use_default_features = false;
        let mut pixel_cap: Option<u64> = None;
        let mut attempt: u32 = 1;

        loop {
            lock(&self.run_state).attempt = attempt;

            let failure = match self
                .attempt(
                    ctx,
                    &image,
                    previous_image.as_ref(),
                    &config,
                    pixel_cap,
                    use_default_features,
                    attempt,
                )
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            if failure == AnalysisError::UserCancellation || !failure.is_recoverable() {
                return Err(failure);
            }

            warn!(
                run_id = %ctx.run_id,
                attempt,
                error = failure.kind_name(),
                detail = failure.detail().unwrap_or(""),
                "Analysis attempt failed"
            );
            ctx.reporter.error(failure.user_message());

            let Some(outcome) = self.planner.plan(&failure, Some(&image), &config, attempt) else {
                warn!(
                    run_id = %ctx.run_id,
                    attempt,
                    error = failure.kind_name(),
                    "Recovery exhausted, returning degraded result"
                );
                self.memory.cleanup();
                return Ok(self.fusion.degraded_result(&failure, attempt));
            };

            info!(
                run_id = %ctx.run_id,
                attempt,
                strategy = ?outcome.strategy,
                delay_ms = outcome.delay.as_millis() as u64,
                "Recovering from failure"
            );

            if !outcome.delay.is_zero() {
                sleep_unless_cancelled(&ctx.cancel, outcome.delay).await?;
            }
            self.memory.cleanup();

            config = outcome.config;
            if let Some(target) = outcome.target_pixels {
                pixel_cap = Some(pixel_cap.map_or(target, |cap| cap.min(target)));
            }
            use_default_features |= outcome.use_default_features;
            attempt += 1;
        }
    }

    /// One pass through steps 2-5
    ///
    /// `pixel_cap` is the resolution target set by recovery; device
    /// adjustment never raises the ceiling above it.
    async fn attempt(
        &self,
        ctx: &RunContext,
        image: &LesionImage,
        previous: Option<&LesionImage>,
        config: &AnalysisConfig,
        pixel_cap: Option<u64>,
        use_default_features: bool,
        attempt: u32,
    ) -> AnalysisResult<CombinedResult> {
        checkpoint(&ctx.cancel)?;
        let adjusted = self.device.adjust(config)?;
        ctx.reporter.progress(AnalysisStage::Initializing, 100.0);

        checkpoint(&ctx.cancel)?;
        ctx.reporter.enter_stage(AnalysisStage::Preprocessing);
        let prepared = self.preprocess(ctx, image, &adjusted, pixel_cap).await?;
        ctx.reporter.progress(AnalysisStage::Preprocessing, 50.0);
        let prepared_previous = match previous {
            Some(previous) => {
                checkpoint(&ctx.cancel)?;
                Some(self.preprocess(ctx, previous, &adjusted, pixel_cap).await?)
            }
            None => None,
        };
        ctx.reporter.progress(AnalysisStage::Preprocessing, 100.0);

        let analyzers = AnalyzerRun {
            workers: &self.workers,
            classifier: &self.classifier,
            feature_analyzer: &self.feature_analyzer,
            reporter: &ctx.reporter,
            cancel: &ctx.cancel,
            run_id: ctx.run_id,
            attempt,
        };
        let outputs = tokio::time::timeout(
            adjusted.total_timeout(),
            analyzers.execute(
                &prepared,
                prepared_previous.as_ref(),
                &adjusted,
                use_default_features,
            ),
        )
        .await
        .map_err(|_| AnalysisError::Timeout)??;

        checkpoint(&ctx.cancel)?;
        ctx.reporter.enter_stage(AnalysisStage::Finalizing);
        let result = self
            .fusion
            .fuse(outputs.classifier.as_ref(), &outputs.features, attempt);

        Ok(result)
    }

    /// Fit the image to the resolution ceiling and the memory budget
    async fn preprocess(
        &self,
        ctx: &RunContext,
        image: &LesionImage,
        config: &AnalysisConfig,
        pixel_cap: Option<u64>,
    ) -> AnalysisResult<LesionImage> {
        let pool = self.memory.pool();
        pool.register(image);

        let status = self.memory.status();
        if status == MemoryStatus::Critical {
            let released = self.memory.cleanup();
            warn!(run_id = %ctx.run_id, released, "Memory critical before preprocessing");
        }

        let mut target = config.max_resolution_pixels();
        if let Some(cap) = pixel_cap {
            target = target.min(cap);
        }
        if !self.memory.fits(image) {
            let bytes_per_pixel = image.byte_size() / image.pixel_count().max(1);
            let affordable = self.memory.affordable_pixels(bytes_per_pixel);
            debug!(
                run_id = %ctx.run_id,
                affordable,
                pixels = image.pixel_count(),
                "Image does not fit memory budget"
            );
            if affordable < self.planner.policy().min_pixels {
                return Err(AnalysisError::OutOfMemory);
            }
            target = target.min(affordable);
        }

        if image.pixel_count() <= target {
            return Ok(image.clone());
        }

        let memory = Arc::clone(&self.memory);
        let input = image.clone();
        let outcome = self
            .workers
            .run_blocking("downscale", config.total_timeout(), move || {
                memory.downscale(&input, target)
            })
            .await;

        let scaled = match outcome {
            TaskOutcome::Completed(result) => result?,
            TaskOutcome::TimedOut => return Err(AnalysisError::Timeout),
            TaskOutcome::Panicked(message) => {
                return Err(AnalysisError::ImageProcessingError(format!(
                    "downscale panicked: {}",
                    message
                )))
            }
        };
        pool.register(&scaled);
        Ok(scaled)
    }
}

/// Recovery delay that ends early on cancellation
async fn sleep_unless_cancelled(cancel: &CancellationToken, delay: Duration) -> AnalysisResult<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AnalysisError::UserCancellation),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    classifier: Arc<dyn LesionClassifier>,
    feature_analyzer: Arc<dyn FeatureAnalyzer>,
    listener: Option<Arc<dyn AnalysisListener>>,
    device: Option<Arc<DeviceProfile>>,
    probe: Option<Arc<dyn MemoryProbe>>,
    policy: RecoveryPolicy,
}

impl OrchestratorBuilder {
    pub fn listener(mut self, listener: Arc<dyn AnalysisListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Device profile to use instead of the detected one
    pub fn device_profile(mut self, profile: DeviceProfile) -> Self {
        self.device = Some(Arc::new(profile));
        self
    }

    /// Memory source to use instead of the run image pool
    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> AnalysisResult<Orchestrator> {
        self.policy.validate()?;

        let device = self
            .device
            .unwrap_or_else(|| Arc::new(DeviceProfile::global().clone()));
        let pool = Arc::new(ImagePool::new());
        let probe = self.probe.unwrap_or_else(|| {
            Arc::new(ImagePoolProbe::new(pool.clone(), device.max_heap_bytes))
        });
        let workers = WorkerPool::new(device.worker_pool_size());

        debug!(
            tier = ?device.tier,
            workers = workers.size(),
            max_attempts = self.policy.max_attempts,
            "Orchestrator built"
        );

        Ok(Orchestrator {
            classifier: self.classifier,
            feature_analyzer: self.feature_analyzer,
            listener: self.listener.unwrap_or_else(|| Arc::new(NoopListener)),
            device,
            memory: Arc::new(MemoryGuard::new(probe, pool)),
            planner: RecoveryPlanner::new(self.policy),
            fusion: ResultFusion::new(),
            workers,
            run_lock: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
            run_state: Arc::new(Mutex::new(RunState::new())),
        })
    }
}
