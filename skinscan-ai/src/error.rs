//! Error taxonomy for analysis runs
//!
//! Every failure inside a run is classified into one [`AnalysisError`] kind.
//! The kind alone decides whether the run can recover and which
//! [`RecoveryStrategy`] applies; the user only ever sees the fixed message
//! for the kind, the detail payload is kept for logs.

use crate::models::AnalysisStage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified analysis failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("Analysis timed out")]
    Timeout,

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Classifier failed: {0}")]
    ClassifierError(String),

    #[error("Feature analysis failed: {0}")]
    FeatureAnalysisError(String),

    #[error("Image processing failed: {0}")]
    ImageProcessingError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Invalid image: {0}")]
    InvalidImageError(String),

    #[error("Analysis cancelled by user")]
    UserCancellation,

    #[error("Unexpected error: {0}")]
    Unknown(String),
}

/// Recovery transformation applied before retrying a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Scale every timeout up
    ExtendTimeout,
    /// Downscale the input image
    ReduceResolution,
    /// Disable the classifier, keep feature analysis
    FallbackToFeatureOnly,
    /// Wait, then retry unchanged
    RetryWithDelay,
    /// Substitute default feature output or default configuration
    UseDefaults,
    /// Fail immediately
    NotRecoverable,
}

impl AnalysisError {
    /// Recovery strategy for this kind (one-to-one)
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            Self::Timeout => RecoveryStrategy::ExtendTimeout,
            Self::OutOfMemory => RecoveryStrategy::ReduceResolution,
            Self::ClassifierError(_) => RecoveryStrategy::FallbackToFeatureOnly,
            Self::NetworkError(_) => RecoveryStrategy::RetryWithDelay,
            Self::FeatureAnalysisError(_) | Self::ConfigurationError(_) => {
                RecoveryStrategy::UseDefaults
            }
            Self::ImageProcessingError(_)
            | Self::InvalidImageError(_)
            | Self::UserCancellation
            | Self::Unknown(_) => RecoveryStrategy::NotRecoverable,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recovery_strategy() != RecoveryStrategy::NotRecoverable
    }

    /// Fixed, non-technical message shown to the user
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Timeout => "The analysis took too long. Please try again.",
            Self::OutOfMemory => {
                "Not enough memory to analyze this photo. Try closing other apps."
            }
            Self::ClassifierError(_) => {
                "The image classifier is unavailable. Results are based on feature analysis only."
            }
            Self::FeatureAnalysisError(_) => {
                "Feature analysis could not be completed for this photo."
            }
            Self::ImageProcessingError(_) => "The photo could not be processed.",
            Self::NetworkError(_) => "A network problem interrupted the analysis.",
            Self::ConfigurationError(_) => "The analysis settings are invalid.",
            Self::InvalidImageError(_) => {
                "The photo is not usable. Please take a clearer, larger photo of the lesion."
            }
            Self::UserCancellation => "Analysis cancelled.",
            Self::Unknown(_) => "Something went wrong during the analysis.",
        }
    }

    /// Technical detail for diagnostics, never shown to the user
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::ClassifierError(d)
            | Self::FeatureAnalysisError(d)
            | Self::ImageProcessingError(d)
            | Self::NetworkError(d)
            | Self::ConfigurationError(d)
            | Self::InvalidImageError(d)
            | Self::Unknown(d) => Some(d),
            Self::Timeout | Self::OutOfMemory | Self::UserCancellation => None,
        }
    }

    /// Short stable name for structured logging
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::OutOfMemory => "out_of_memory",
            Self::ClassifierError(_) => "classifier_error",
            Self::FeatureAnalysisError(_) => "feature_analysis_error",
            Self::ImageProcessingError(_) => "image_processing_error",
            Self::NetworkError(_) => "network_error",
            Self::ConfigurationError(_) => "configuration_error",
            Self::InvalidImageError(_) => "invalid_image_error",
            Self::UserCancellation => "user_cancellation",
            Self::Unknown(_) => "unknown",
        }
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Failure reported by an external analyzer collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalyzerFailure {
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Failed(String),
}

/// Which analyzer a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    Classifier,
    FeatureAnalysis,
}

impl FailureSource {
    /// Stage in which this analyzer runs
    pub fn stage(self) -> AnalysisStage {
        match self {
            Self::Classifier => AnalysisStage::ClassifierAnalysis,
            Self::FeatureAnalysis => AnalysisStage::FeatureAnalysis,
        }
    }
}

/// Maps raw failures into the [`AnalysisError`] taxonomy
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a collaborator failure
    pub fn classify_analyzer(source: FailureSource, failure: AnalyzerFailure) -> AnalysisError {
        match failure {
            AnalyzerFailure::OutOfMemory(_) => AnalysisError::OutOfMemory,
            AnalyzerFailure::Network(detail) => AnalysisError::NetworkError(detail),
            AnalyzerFailure::InvalidInput(detail) => AnalysisError::InvalidImageError(detail),
            AnalyzerFailure::Failed(detail) => match source {
                FailureSource::Classifier => AnalysisError::ClassifierError(detail),
                FailureSource::FeatureAnalysis => AnalysisError::FeatureAnalysisError(detail),
            },
        }
    }

    /// Classify an analyzer task that panicked
    pub fn classify_panic(source: FailureSource, message: String) -> AnalysisError {
        let detail = format!("analyzer panicked: {}", message);
        match source {
            FailureSource::Classifier => AnalysisError::ClassifierError(detail),
            FailureSource::FeatureAnalysis => AnalysisError::FeatureAnalysisError(detail),
        }
    }

    /// Classify an image decoding/resizing error
    pub fn classify_image_error(err: &image::ImageError) -> AnalysisError {
        match err {
            image::ImageError::Limits(_) => AnalysisError::OutOfMemory,
            other => AnalysisError::ImageProcessingError(other.to_string()),
        }
    }
}
