//! Analysis stage: runs the analyzers and applies the degrade rules
//!
//! Parallel mode launches both analyzers on the worker pool and joins them
//! independently; sequential mode runs classifier then feature analysis. In
//! both modes one analyzer failing never stops the other.

use crate::analyzers::{FeatureAnalyzer, LesionClassifier};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, AnalysisResult, ErrorClassifier, FailureSource};
use crate::events::ProgressReporter;
use crate::fusion::default_feature_output;
use crate::models::{AnalysisStage, ClassifierOutput, FeatureOutput, LesionImage};
use crate::worker_pool::{TaskOutcome, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Analyzer results handed to fusion
#[derive(Debug, Clone)]
pub struct AnalysisOutputs {
    /// `None` when the classifier was disabled or failed
    pub classifier: Option<ClassifierOutput>,
    pub features: FeatureOutput,
}

/// Result of one analyzer branch; `None` when the analyzer is disabled
pub type Branch<T> = Option<AnalysisResult<T>>;

/// Everything one analysis stage needs, borrowed from the orchestrator
pub(super) struct AnalyzerRun<'a> {
    pub workers: &'a WorkerPool,
    pub classifier: &'a Arc<dyn LesionClassifier>,
    pub feature_analyzer: &'a Arc<dyn FeatureAnalyzer>,
    pub reporter: &'a ProgressReporter,
    pub cancel: &'a CancellationToken,
    pub run_id: Uuid,
    pub attempt: u32,
}

impl AnalyzerRun<'_> {
    pub async fn execute(
        &self,
        image: &LesionImage,
        previous: Option<&LesionImage>,
        config: &AnalysisConfig,
        use_default_features: bool,
    ) -> AnalysisResult<AnalysisOutputs> {
        let (classifier, features) = if config.runs_parallel() {
            self.parallel(image, previous, config, use_default_features)
                .await?
        } else {
            self.sequential(image, previous, config, use_default_features)
                .await?
        };

        resolve_outputs(classifier, features)
    }

    async fn parallel(
        &self,
        image: &LesionImage,
        previous: Option<&LesionImage>,
        config: &AnalysisConfig,
        use_default_features: bool,
    ) -> AnalysisResult<(Branch<ClassifierOutput>, Branch<FeatureOutput>)> {
        checkpoint(self.cancel)?;
        self.reporter.enter_stage(AnalysisStage::ClassifierAnalysis);

        debug!(run_id = %self.run_id, attempt = self.attempt, "Running analyzers in parallel");

        let (classifier, features) = tokio::join!(
            self.classify(image, config.classifier_timeout()),
            self.analyze_features(image, previous, config.feature_timeout(), use_default_features),
        );

        checkpoint(self.cancel)?;
        self.reporter
            .progress(AnalysisStage::ClassifierAnalysis, 100.0);
        self.reporter.enter_stage(AnalysisStage::FeatureAnalysis);
        self.reporter.progress(AnalysisStage::FeatureAnalysis, 100.0);

        Ok((Some(classifier), Some(features)))
    }

    async fn sequential(
        &self,
        image: &LesionImage,
        previous: Option<&LesionImage>,
        config: &AnalysisConfig,
        use_default_features: bool,
    ) -> AnalysisResult<(Branch<ClassifierOutput>, Branch<FeatureOutput>)> {
        let classifier = if config.enable_classifier() {
            checkpoint(self.cancel)?;
            self.reporter.enter_stage(AnalysisStage::ClassifierAnalysis);
            let result = self.classify(image, config.classifier_timeout()).await;
            self.reporter
                .progress(AnalysisStage::ClassifierAnalysis, 100.0);
            Some(result)
        } else {
            None
        };

        let features = if config.enable_feature_analysis() {
            checkpoint(self.cancel)?;
            self.reporter.enter_stage(AnalysisStage::FeatureAnalysis);
            let result = self
                .analyze_features(image, previous, config.feature_timeout(), use_default_features)
                .await;
            self.reporter.progress(AnalysisStage::FeatureAnalysis, 100.0);
            Some(result)
        } else {
            None
        };

        Ok((classifier, features))
    }

    async fn classify(&self, image: &LesionImage, timeout: Duration) -> AnalysisResult<ClassifierOutput> {
        let classifier = Arc::clone(self.classifier);
        let name = classifier.name().to_string();
        let input = image.clone();

        let outcome = self
            .workers
            .run_blocking(&name, timeout, move || classifier.classify(&input))
            .await;

        let result = match outcome {
            TaskOutcome::Completed(Ok(score)) => Ok(ClassifierOutput::from_score(score)),
            TaskOutcome::Completed(Err(failure)) => Err(ErrorClassifier::classify_analyzer(
                FailureSource::Classifier,
                failure,
            )),
            TaskOutcome::TimedOut => Err(AnalysisError::Timeout),
            TaskOutcome::Panicked(message) => {
                Err(ErrorClassifier::classify_panic(FailureSource::Classifier, message))
            }
        };
        self.log_branch(FailureSource::Classifier, &result);
        result
    }

    async fn analyze_features(
        &self,
        image: &LesionImage,
        previous: Option<&LesionImage>,
        timeout: Duration,
        use_default_features: bool,
    ) -> AnalysisResult<FeatureOutput> {
        if use_default_features {
            debug!(run_id = %self.run_id, attempt = self.attempt, "Using default feature output");
            return Ok(default_feature_output(
                "feature analysis replaced by default values after an earlier failure",
            ));
        }

        let analyzer = Arc::clone(self.feature_analyzer);
        let name = analyzer.name().to_string();
        let input = image.clone();
        let previous = previous.cloned();
        let density = image.pixel_density();

        let outcome = self
            .workers
            .run_blocking(&name, timeout, move || {
                analyzer.analyze(&input, previous.as_ref(), density)
            })
            .await;

        let result = match outcome {
            TaskOutcome::Completed(Ok(output)) => Ok(output),
            TaskOutcome::Completed(Err(failure)) => Err(ErrorClassifier::classify_analyzer(
                FailureSource::FeatureAnalysis,
                failure,
            )),
            TaskOutcome::TimedOut => Err(AnalysisError::Timeout),
            TaskOutcome::Panicked(message) => Err(ErrorClassifier::classify_panic(
                FailureSource::FeatureAnalysis,
                message,
            )),
        };
        self.log_branch(FailureSource::FeatureAnalysis, &result);
        result
    }

    fn log_branch<T>(&self, source: FailureSource, result: &AnalysisResult<T>) {
        match result {
            Ok(_) => debug!(
                run_id = %self.run_id,
                attempt = self.attempt,
                stage = ?source.stage(),
                "Analyzer finished"
            ),
            Err(e) => warn!(
                run_id = %self.run_id,
                attempt = self.attempt,
                stage = ?source.stage(),
                error = e.kind_name(),
                detail = e.detail().unwrap_or(""),
                "Analyzer failed"
            ),
        }
    }
}

/// Raise [`AnalysisError::UserCancellation`] once cancellation was requested
pub(super) fn checkpoint(cancel: &CancellationToken) -> AnalysisResult<()> {
    if cancel.is_cancelled() {
        Err(AnalysisError::UserCancellation)
    } else {
        Ok(())
    }
}

/// Apply the degrade and escalation rules to the branch results
///
/// A failed classifier is dropped and a failed feature analysis is replaced
/// by the conservative default. The failure is escalated instead when no
/// analyzer produced an output, or when it is a resource condition
/// (`OutOfMemory`, `NetworkError`) that a retry can fix.
pub fn resolve_outputs(
    classifier: Branch<ClassifierOutput>,
    features: Branch<FeatureOutput>,
) -> AnalysisResult<AnalysisOutputs> {
    let (classifier_output, classifier_error) = split(classifier);
    let (feature_output, feature_error) = split(features);

    let is_resource = |e: &AnalysisError| {
        matches!(e, AnalysisError::OutOfMemory | AnalysisError::NetworkError(_))
    };
    for error in [&classifier_error, &feature_error].into_iter().flatten() {
        if is_resource(error) {
            return Err(error.clone());
        }
    }

    if classifier_output.is_none() && feature_output.is_none() {
        return Err(classifier_error.or(feature_error).unwrap_or_else(|| {
            AnalysisError::ConfigurationError("no analyzer enabled".to_string())
        }));
    }

    let features = match (feature_output, feature_error) {
        (Some(output), _) => output,
        (None, Some(error)) => {
            debug!(error = %error, "Feature analysis replaced by default values");
            default_feature_output(error.user_message())
        }
        (None, None) => default_feature_output("feature analysis disabled"),
    };

    Ok(AnalysisOutputs {
        classifier: classifier_output,
        features,
    })
}

fn split<T>(branch: Branch<T>) -> (Option<T>, Option<AnalysisError>) {
    match branch {
        Some(Ok(value)) => (Some(value), None),
        Some(Err(error)) => (None, Some(error)),
        None => (None, None),
    }
}
