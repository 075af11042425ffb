//! Analyzer collaborator contracts
//!
//! Both analyzers are externally owned and CPU-bound. The orchestrator runs
//! them on blocking worker threads, so implementations are plain synchronous
//! code and must be `Send + Sync`. Each call receives its own immutable
//! inputs; an analyzer never sees state from another task.

use crate::error::AnalyzerFailure;
use crate::models::{ClassifierScore, FeatureOutput, LesionImage};

/// Learned image classifier
pub trait LesionClassifier: Send + Sync {
    /// Name for logs
    fn name(&self) -> &str {
        "classifier"
    }

    /// Melanoma probability and confidence for one image
    fn classify(&self, image: &LesionImage) -> Result<ClassifierScore, AnalyzerFailure>;
}

/// Rule-based dermoscopic feature analyzer
pub trait FeatureAnalyzer: Send + Sync {
    /// Name for logs
    fn name(&self) -> &str {
        "feature-analyzer"
    }

    /// Sub-scores and findings for an image
    ///
    /// `previous` enables the evolution criterion. `pixel_density` is pixels
    /// per millimetre of `image` after any downscaling.
    fn analyze(
        &self,
        image: &LesionImage,
        previous: Option<&LesionImage>,
        pixel_density: f32,
    ) -> Result<FeatureOutput, AnalyzerFailure>;
}
