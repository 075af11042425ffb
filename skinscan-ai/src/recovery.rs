//! Recovery planning
//!
//! Turns a classified failure into the configuration for the next attempt.
//! The planner is pure: it never sleeps and never touches images or the
//! listener. The orchestrator applies the returned delay and re-enters the
//! pipeline, whose preprocessing stage downscales to the lowered resolution
//! ceiling.

use crate::config::{AnalysisConfig, RecoveryPolicy};
use crate::error::{AnalysisError, RecoveryStrategy};
use crate::models::LesionImage;
use std::time::Duration;
use tracing::{debug, warn};

/// Inputs for the next attempt
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub strategy: RecoveryStrategy,
    pub config: AnalysisConfig,
    /// Pixel budget, set when the resolution was reduced
    pub target_pixels: Option<u64>,
    /// Wait before the next attempt
    pub delay: Duration,
    /// Substitute the default feature output instead of running the analyzer
    pub use_default_features: bool,
}

impl RecoveryOutcome {
    fn with_config(strategy: RecoveryStrategy, config: AnalysisConfig) -> Self {
        Self {
            strategy,
            config,
            target_pixels: None,
            delay: Duration::ZERO,
            use_default_features: false,
        }
    }
}

/// Pixel budget for a resolution-reduction retry
///
/// `current × resolution_factor / attempt`, or `None` below the policy floor.
pub fn reduced_pixel_target(current: u64, attempt: u32, policy: &RecoveryPolicy) -> Option<u64> {
    let attempt = attempt.max(1) as f64;
    let target = (current as f64 * policy.resolution_factor / attempt).floor() as u64;
    if target < policy.min_pixels {
        None
    } else {
        Some(target)
    }
}

/// Maps failures to recovery transformations
#[derive(Debug, Clone, Default)]
pub struct RecoveryPlanner {
    policy: RecoveryPolicy,
}

impl RecoveryPlanner {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Plan the attempt after `attempt` failed with `error`
    ///
    /// Returns `None` when the error is not recoverable, the attempt cap is
    /// reached, or the strategy has nothing left to try.
    pub fn plan(
        &self,
        error: &AnalysisError,
        image: Option<&LesionImage>,
        config: &AnalysisConfig,
        attempt: u32,
    ) -> Option<RecoveryOutcome> {
        if attempt > self.policy.max_attempts {
            debug!(attempt, max_attempts = self.policy.max_attempts, "Recovery attempts exhausted");
            return None;
        }

        let strategy = error.recovery_strategy();
        match strategy {
            RecoveryStrategy::ExtendTimeout => {
                let factor = self.policy.timeout_multiplier * attempt as f64;
                match config.scale_timeouts(factor) {
                    Ok(extended) => Some(RecoveryOutcome::with_config(strategy, extended)),
                    Err(e) => {
                        warn!(error = %e, "Could not extend timeouts");
                        None
                    }
                }
            }
            RecoveryStrategy::ReduceResolution => self.reduce_resolution(image, config, attempt),
            RecoveryStrategy::FallbackToFeatureOnly => {
                if !config.enable_feature_analysis() {
                    return None;
                }
                config
                    .without_classifier()
                    .ok()
                    .map(|feature_only| RecoveryOutcome::with_config(strategy, feature_only))
            }
            RecoveryStrategy::RetryWithDelay => Some(RecoveryOutcome {
                delay: self.policy.base_retry_delay * attempt,
                ..RecoveryOutcome::with_config(strategy, config.clone())
            }),
            RecoveryStrategy::UseDefaults => match error {
                AnalysisError::ConfigurationError(_) => Some(RecoveryOutcome::with_config(
                    strategy,
                    AnalysisConfig::default(),
                )),
                _ => Some(RecoveryOutcome {
                    use_default_features: true,
                    ..RecoveryOutcome::with_config(strategy, config.clone())
                }),
            },
            RecoveryStrategy::NotRecoverable => None,
        }
    }

    fn reduce_resolution(
        &self,
        image: Option<&LesionImage>,
        config: &AnalysisConfig,
        attempt: u32,
    ) -> Option<RecoveryOutcome> {
        let current = image
            .map(LesionImage::pixel_count)
            .unwrap_or_else(|| config.max_resolution_pixels());
        let target = reduced_pixel_target(current, attempt, &self.policy)?;

        let reduced_config = config
            .to_builder()
            .max_resolution_pixels(config.max_resolution_pixels().min(target))
            .build()
            .ok()?;

        debug!(current, target, attempt, "Resolution reduced for retry");

        Some(RecoveryOutcome {
            target_pixels: Some(target),
            ..RecoveryOutcome::with_config(RecoveryStrategy::ReduceResolution, reduced_config)
        })
    }
}
