//! Analyzer outputs and the fused verdict
//!
//! These are the data contracts between the analyzers, fusion and the
//! caller. Each output is produced once per attempt and consumed
//! immediately by fusion.

use serde::{Deserialize, Serialize};

/// Discrete risk bucket shared by both analyzers and the fused verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    /// Bucket for a score in [0, 1]
    pub fn from_score(score: f64) -> Self {
        if score < 0.2 {
            Self::VeryLow
        } else if score < 0.4 {
            Self::Low
        } else if score < 0.6 {
            Self::Medium
        } else if score < 0.8 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }
}

/// Clinical follow-up recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Routine,
    Monitor,
    Consult,
    Urgent,
}

/// Raw classifier collaborator output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierScore {
    pub probability: f64,
    pub confidence: f64,
}

/// Classifier result as consumed by fusion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOutput {
    /// Melanoma probability [0, 1]
    pub probability: f64,
    pub risk: RiskLevel,
    /// [0, 1]
    pub confidence: f64,
}

impl ClassifierOutput {
    /// Clamp collaborator values and derive the bucket
    pub fn from_score(score: ClassifierScore) -> Self {
        let probability = clamp_unit(score.probability);
        Self {
            probability,
            risk: RiskLevel::from_score(probability),
            confidence: clamp_unit(score.confidence),
        }
    }
}

/// Dermoscopic sub-scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureScores {
    /// 0-2
    pub asymmetry: f64,
    /// 0-8 (irregular border segments)
    pub border: f64,
    /// 1-6 (distinct colors)
    pub color: f64,
    /// 0-5
    pub diameter: f64,
    /// 0-3, only with a previous image
    pub evolution: Option<f64>,
}

impl FeatureScores {
    /// Clamp each sub-score into its documented range
    pub fn clamped(self) -> Self {
        Self {
            asymmetry: self.asymmetry.clamp(0.0, 2.0),
            border: self.border.clamp(0.0, 8.0),
            color: self.color.clamp(1.0, 6.0),
            diameter: self.diameter.clamp(0.0, 5.0),
            evolution: self.evolution.map(|e| e.clamp(0.0, 3.0)),
        }
    }

    /// Weighted dermoscopy score (A×1.3 + B×0.1 + C×0.5 + D×0.5 + E×0.5)
    pub fn aggregate(&self) -> f64 {
        self.asymmetry * 1.3
            + self.border * 0.1
            + self.color * 0.5
            + self.diameter * 0.5
            + self.evolution.unwrap_or(0.0) * 0.5
    }
}

/// Structured textual findings of the feature analyzer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureFindings {
    pub asymmetry: String,
    pub border: String,
    pub color: String,
    pub diameter: String,
    pub evolution: Option<String>,
    pub blue_white_veil: bool,
    pub red_blue_combination: bool,
    /// Set when this output is a placeholder for a failed analysis
    pub failure_reason: Option<String>,
}

/// Feature analyzer result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureOutput {
    pub scores: FeatureScores,
    /// Aggregate score, normalized by fusion against a fixed ceiling
    pub total_score: f64,
    pub risk: RiskLevel,
    pub findings: FeatureFindings,
}

/// Aggregate score that maps to a normalized feature score of 1.0
pub const FEATURE_SCORE_CEILING: f64 = 10.0;

impl FeatureOutput {
    /// Output with aggregate and bucket derived from the sub-scores
    pub fn from_scores(scores: FeatureScores, findings: FeatureFindings) -> Self {
        let scores = scores.clamped();
        let total_score = scores.aggregate();
        Self {
            scores,
            total_score,
            risk: RiskLevel::from_score(total_score / FEATURE_SCORE_CEILING),
            findings,
        }
    }

    /// Lowest-risk placeholder used when feature analysis failed
    pub fn conservative_default(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            scores: FeatureScores {
                asymmetry: 0.0,
                border: 0.0,
                color: 1.0,
                diameter: 0.0,
                evolution: None,
            },
            total_score: 0.0,
            risk: RiskLevel::VeryLow,
            findings: FeatureFindings {
                asymmetry: "Not assessed".to_string(),
                border: "Not assessed".to_string(),
                color: "Not assessed".to_string(),
                diameter: "Not assessed".to_string(),
                evolution: None,
                blue_white_veil: false,
                red_blue_combination: false,
                failure_reason: Some(reason),
            },
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.findings.failure_reason.is_some()
    }

    /// Aggregate normalized to [0, 1]
    pub fn normalized_score(&self) -> f64 {
        clamp_unit(self.total_score / FEATURE_SCORE_CEILING)
    }
}

/// Pass/warn state of one explanation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationStatus {
    Pass,
    Warn,
}

impl ExplanationStatus {
    pub fn icon(self) -> &'static str {
        match self {
            Self::Pass => "✓",
            Self::Warn => "⚠",
        }
    }
}

/// One criterion of the verdict explanation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub criterion: String,
    pub status: ExplanationStatus,
    pub message: String,
}

/// Fused verdict returned by a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedResult {
    /// Classifier probability, 0 when the classifier did not contribute
    pub ai_probability: f64,
    pub ai_confidence: f64,
    pub classifier_used: bool,
    pub features: FeatureOutput,
    /// Fused score [0, 1]
    pub combined_score: f64,
    pub risk: RiskLevel,
    pub urgency: UrgencyLevel,
    /// Confidence of the verdict as a whole [0, 1]
    pub confidence: f64,
    pub recommendation: String,
    pub explanations: Vec<Explanation>,
    /// Recovery attempts were exhausted and this is a fallback verdict
    pub degraded: bool,
    /// Attempts used to produce this result (1-based)
    pub attempts: u32,
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
