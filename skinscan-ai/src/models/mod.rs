//! Data model shared by every stage of a run

pub mod lesion_image;
pub mod outputs;
pub mod stage;

pub use lesion_image::{AnalysisRequest, LesionImage, DEFAULT_PIXEL_DENSITY, MIN_IMAGE_PIXELS};
pub use outputs::{
    ClassifierOutput, ClassifierScore, CombinedResult, Explanation, ExplanationStatus,
    FeatureFindings, FeatureOutput, FeatureScores, RiskLevel, UrgencyLevel,
    FEATURE_SCORE_CEILING,
};
pub use stage::{AnalysisStage, RunState, RunStatus};
