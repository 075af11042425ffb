//! Result fusion
//!
//! Combines classifier and feature-analysis outputs into one verdict.
//!
//! Algorithm:
//! 1. Normalize the feature aggregate against
//!    [`FEATURE_SCORE_CEILING`](crate::models::FEATURE_SCORE_CEILING)
//! 2. Weighted blend with the classifier probability (or the feature score
//!    alone when the classifier did not contribute)
//! 3. Multiplicative adjustments for high-risk findings, then reclamp
//! 4. Bucket, urgency from danger indicators, explanations
//!
//! Fusion is pure: identical inputs always yield identical results.

use crate::error::AnalysisError;
use crate::models::outputs::clamp_unit;
use crate::models::{
    ClassifierOutput, CombinedResult, Explanation, ExplanationStatus, FeatureOutput, RiskLevel,
    UrgencyLevel,
};
use tracing::debug;

const CLASSIFIER_WEIGHT: f64 = 0.6;
const FEATURE_WEIGHT: f64 = 0.4;

const VEIL_MULTIPLIER: f64 = 1.2;
const DIAMETER_MULTIPLIER: f64 = 1.1;
const EVOLUTION_MULTIPLIER: f64 = 1.3;
const BORDER_MULTIPLIER: f64 = 1.15;

/// Classifier probability treated as high for urgency
const HIGH_PROBABILITY: f64 = 0.7;

/// Confidence attributed to a real feature analysis
const FEATURE_CONFIDENCE: f64 = 0.8;
/// Confidence attributed to the conservative placeholder
const PLACEHOLDER_CONFIDENCE: f64 = 0.2;
/// Confidence of a degraded fallback verdict
pub const MIN_CONFIDENCE: f64 = 0.1;

/// Lowest-risk feature output standing in for a failed analysis
pub fn default_feature_output(reason: impl Into<String>) -> FeatureOutput {
    FeatureOutput::conservative_default(reason)
}

/// Verdict fuser
#[derive(Debug, Clone, Default)]
pub struct ResultFusion;

impl ResultFusion {
    pub fn new() -> Self {
        Self
    }

    /// Fuse analyzer outputs
    ///
    /// `classifier` is `None` when the classifier was disabled or failed.
    /// Without a classifier a placeholder feature output yields a degraded
    /// verdict of at least [`UrgencyLevel::Monitor`].
    pub fn fuse(
        &self,
        classifier: Option<&ClassifierOutput>,
        features: &FeatureOutput,
        attempts: u32,
    ) -> CombinedResult {
        let feature_score = features.normalized_score();

        let base = match classifier {
            Some(c) => clamp_unit(c.probability * CLASSIFIER_WEIGHT + feature_score * FEATURE_WEIGHT),
            None => feature_score,
        };
        let combined_score = clamp_unit(apply_adjustments(base, features));
        let risk = RiskLevel::from_score(combined_score);

        let indicators = danger_indicators(features);
        let probability = classifier.map(|c| c.probability).unwrap_or(0.0);
        let mut urgency = urgency(risk, indicators, probability);

        // Nothing real was measured; never report that as all clear
        let degraded = classifier.is_none() && features.is_placeholder();
        if degraded {
            urgency = urgency.max(UrgencyLevel::Monitor);
        }

        let feature_confidence = if features.is_placeholder() {
            PLACEHOLDER_CONFIDENCE
        } else {
            FEATURE_CONFIDENCE
        };
        let confidence = match classifier {
            Some(c) => clamp_unit(c.confidence * CLASSIFIER_WEIGHT + feature_confidence * FEATURE_WEIGHT),
            None => feature_confidence * 0.5,
        };

        debug!(
            combined_score,
            risk = ?risk,
            urgency = ?urgency,
            indicators,
            classifier_used = classifier.is_some(),
            degraded,
            "Results fused"
        );

        CombinedResult {
            ai_probability: probability,
            ai_confidence: classifier.map(|c| c.confidence).unwrap_or(0.0),
            classifier_used: classifier.is_some(),
            features: features.clone(),
            combined_score,
            risk,
            urgency,
            confidence,
            recommendation: match &features.findings.failure_reason {
                Some(reason) if degraded => incomplete_recommendation(reason),
                _ => recommendation(urgency, classifier.is_some()),
            },
            explanations: explanations(classifier, features),
            degraded,
            attempts,
        }
    }

    /// Minimal-confidence verdict used when recovery is exhausted
    pub fn degraded_result(&self, error: &AnalysisError, attempts: u32) -> CombinedResult {
        let features = default_feature_output(error.user_message());
        CombinedResult {
            ai_probability: 0.0,
            ai_confidence: 0.0,
            classifier_used: false,
            features,
            combined_score: 0.0,
            risk: RiskLevel::VeryLow,
            urgency: UrgencyLevel::Monitor,
            confidence: MIN_CONFIDENCE,
            recommendation: incomplete_recommendation(error.user_message()),
            explanations: vec![Explanation {
                criterion: "Analysis".to_string(),
                status: ExplanationStatus::Warn,
                message: format!(
                    "Analysis degraded after {} attempt(s): {}",
                    attempts,
                    error.user_message()
                ),
            }],
            degraded: true,
            attempts,
        }
    }
}

fn apply_adjustments(score: f64, features: &FeatureOutput) -> f64 {
    let scores = &features.scores;
    let mut adjusted = score;
    if features.findings.blue_white_veil {
        adjusted *= VEIL_MULTIPLIER;
    }
    if scores.diameter >= 3.0 {
        adjusted *= DIAMETER_MULTIPLIER;
    }
    if scores.evolution.is_some_and(|e| e > 2.0) {
        adjusted *= EVOLUTION_MULTIPLIER;
    }
    if scores.border / 8.0 > 0.3 {
        adjusted *= BORDER_MULTIPLIER;
    }
    adjusted
}

/// Count of independent danger indicators (0-5)
pub fn danger_indicators(features: &FeatureOutput) -> u32 {
    let scores = &features.scores;
    [
        features.findings.blue_white_veil,
        features.findings.red_blue_combination,
        scores.diameter >= 4.0,
        scores.evolution.is_some_and(|e| e >= 2.0),
        scores.border >= 6.0,
    ]
    .iter()
    .filter(|hit| **hit)
    .count() as u32
}

fn urgency(risk: RiskLevel, indicators: u32, probability: f64) -> UrgencyLevel {
    if indicators >= 3 || risk == RiskLevel::VeryHigh {
        UrgencyLevel::Urgent
    } else if risk == RiskLevel::High || (indicators >= 2 && probability >= HIGH_PROBABILITY) {
        UrgencyLevel::Consult
    } else if risk == RiskLevel::Medium || indicators >= 1 {
        UrgencyLevel::Monitor
    } else {
        UrgencyLevel::Routine
    }
}

fn incomplete_recommendation(reason: &str) -> String {
    format!(
        "{} The automated assessment is incomplete. Retake the photo or have the lesion checked by a dermatologist.",
        reason
    )
}

fn recommendation(urgency: UrgencyLevel, classifier_used: bool) -> String {
    let advice = match urgency {
        UrgencyLevel::Urgent => {
            "Several high-risk signs were found. See a dermatologist as soon as possible."
        }
        UrgencyLevel::Consult => {
            "Some concerning signs were found. Book a dermatologist appointment within the next weeks."
        }
        UrgencyLevel::Monitor => {
            "Keep an eye on this lesion and photograph it again in about a month to track changes."
        }
        UrgencyLevel::Routine => {
            "No concerning signs were found. Continue regular skin self-checks."
        }
    };
    if classifier_used {
        advice.to_string()
    } else {
        format!(
            "Based on feature analysis only, with reduced confidence. {}",
            advice
        )
    }
}

fn explanations(classifier: Option<&ClassifierOutput>, features: &FeatureOutput) -> Vec<Explanation> {
    let scores = &features.scores;
    let findings = &features.findings;

    let entry = |criterion: &str, warn: bool, message: String| Explanation {
        criterion: criterion.to_string(),
        status: if warn {
            ExplanationStatus::Warn
        } else {
            ExplanationStatus::Pass
        },
        message,
    };

    let mut list = vec![
        entry(
            "Asymmetry",
            scores.asymmetry >= 1.0,
            format!("{} ({:.1}/2)", findings.asymmetry, scores.asymmetry),
        ),
        entry(
            "Border",
            scores.border / 8.0 > 0.3,
            format!("{} ({:.0}/8 irregular segments)", findings.border, scores.border),
        ),
        entry(
            "Color",
            scores.color >= 3.0,
            format!("{} ({:.0} colors)", findings.color, scores.color),
        ),
        entry(
            "Diameter",
            scores.diameter >= 3.0,
            format!("{} ({:.1}/5)", findings.diameter, scores.diameter),
        ),
    ];

    list.push(match scores.evolution {
        Some(evolution) => entry(
            "Evolution",
            evolution >= 2.0,
            format!(
                "{} ({:.1}/3)",
                findings.evolution.as_deref().unwrap_or("Compared with previous photo"),
                evolution
            ),
        ),
        None => entry(
            "Evolution",
            false,
            "No previous photo to compare with".to_string(),
        ),
    });

    list.push(entry(
        "Blue-white veil",
        findings.blue_white_veil,
        if findings.blue_white_veil {
            "Blue-white veil present".to_string()
        } else {
            "No blue-white veil".to_string()
        },
    ));
    list.push(entry(
        "Red-blue combination",
        findings.red_blue_combination,
        if findings.red_blue_combination {
            "Red-blue color combination present".to_string()
        } else {
            "No red-blue color combination".to_string()
        },
    ));

    list.push(match classifier {
        Some(c) => entry(
            "Image classifier",
            c.probability >= 0.5,
            format!(
                "Melanoma probability {:.0}% (confidence {:.0}%)",
                c.probability * 100.0,
                c.confidence * 100.0
            ),
        ),
        None => entry(
            "Image classifier",
            false,
            "Not used for this result".to_string(),
        ),
    });

    if let Some(reason) = &findings.failure_reason {
        list.push(entry(
            "Feature analysis",
            true,
            format!("Not completed, default values used: {}", reason),
        ));
    }

    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassifierScore, FeatureFindings, FeatureScores, FEATURE_SCORE_CEILING};

    fn features(total_score: f64) -> FeatureOutput {
        FeatureOutput {
            scores: FeatureScores {
                asymmetry: 1.0,
                border: 2.0,
                color: 2.0,
                diameter: 1.0,
                evolution: None,
            },
            total_score,
            risk: RiskLevel::from_score(total_score / FEATURE_SCORE_CEILING),
            findings: FeatureFindings::default(),
        }
    }

    fn classifier(probability: f64) -> ClassifierOutput {
        ClassifierOutput::from_score(ClassifierScore {
            probability,
            confidence: 0.9,
        })
    }

    #[test]
    fn test_balanced_inputs_are_medium() {
        let result = ResultFusion::new().fuse(Some(&classifier(0.5)), &features(5.0), 1);
        assert_eq!(result.combined_score, 0.5);
        assert_eq!(result.risk, RiskLevel::Medium);
        assert_eq!(result.urgency, UrgencyLevel::Monitor);
        assert!(result.classifier_used);
    }

    #[test]
    fn test_blue_white_veil_raises_score() {
        let mut input = features(5.0);
        input.findings.blue_white_veil = true;

        let result = ResultFusion::new().fuse(Some(&classifier(0.5)), &input, 1);
        assert!((result.combined_score - 0.6).abs() < 1e-12);
        assert_eq!(result.risk, RiskLevel::High);
        assert_eq!(result.urgency, UrgencyLevel::Consult);
    }

    #[test]
    fn test_feature_only_equals_feature_score() {
        let input = features(4.2);
        let result = ResultFusion::new().fuse(None, &input, 1);

        assert_eq!(result.combined_score, input.normalized_score());
        assert_eq!(result.ai_probability, 0.0);
        assert!(!result.classifier_used);
        assert!(result.recommendation.starts_with("Based on feature analysis only"));
        assert!((result.confidence - FEATURE_CONFIDENCE * 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_adjustments_are_clamped() {
        let mut input = features(9.0);
        input.scores.diameter = 5.0;
        input.scores.border = 8.0;
        input.scores.evolution = Some(3.0);
        input.findings.blue_white_veil = true;

        let result = ResultFusion::new().fuse(Some(&classifier(1.0)), &input, 1);
        assert_eq!(result.combined_score, 1.0);
        assert_eq!(result.risk, RiskLevel::VeryHigh);
        assert_eq!(result.urgency, UrgencyLevel::Urgent);
    }

    #[test]
    fn test_indicator_counting() {
        let mut input = features(1.0);
        assert_eq!(danger_indicators(&input), 0);

        input.findings.red_blue_combination = true;
        input.scores.diameter = 4.0;
        input.scores.evolution = Some(2.0);
        assert_eq!(danger_indicators(&input), 3);

        let result = ResultFusion::new().fuse(None, &input, 1);
        assert_eq!(result.urgency, UrgencyLevel::Urgent);
    }

    #[test]
    fn test_two_indicators_with_high_probability_consult() {
        let mut input = features(1.0);
        input.findings.red_blue_combination = true;
        input.scores.border = 6.0;

        assert_eq!(
            urgency(RiskLevel::Low, danger_indicators(&input), 0.75),
            UrgencyLevel::Consult
        );
        assert_eq!(
            urgency(RiskLevel::Low, danger_indicators(&input), 0.5),
            UrgencyLevel::Monitor
        );
        assert_eq!(urgency(RiskLevel::Low, 0, 0.9), UrgencyLevel::Routine);
    }

    #[test]
    fn test_explanations_ordered_one_per_criterion() {
        let result = ResultFusion::new().fuse(Some(&classifier(0.2)), &features(3.0), 1);
        let criteria: Vec<&str> = result
            .explanations
            .iter()
            .map(|e| e.criterion.as_str())
            .collect();
        assert_eq!(
            criteria,
            vec![
                "Asymmetry",
                "Border",
                "Color",
                "Diameter",
                "Evolution",
                "Blue-white veil",
                "Red-blue combination",
                "Image classifier",
            ]
        );
    }

    #[test]
    fn test_placeholder_is_explained() {
        let placeholder = default_feature_output("segmentation failed");
        let result = ResultFusion::new().fuse(Some(&classifier(0.3)), &placeholder, 2);

        let last = result.explanations.last().unwrap();
        assert_eq!(last.criterion, "Feature analysis");
        assert_eq!(last.status, ExplanationStatus::Warn);
        assert!(last.message.contains("segmentation failed"));
        assert_eq!(result.attempts, 2);
    }

    #[test]
    fn test_placeholder_only_is_degraded() {
        let placeholder = default_feature_output("Feature analysis could not be completed.");
        let result = ResultFusion::new().fuse(None, &placeholder, 2);

        assert!(result.degraded);
        assert!(!result.classifier_used);
        assert_eq!(result.risk, RiskLevel::VeryLow);
        assert_eq!(result.urgency, UrgencyLevel::Monitor);
        assert!(result.recommendation.contains("incomplete"));
        assert!(!result.recommendation.contains("No concerning signs"));
    }

    #[test]
    fn test_placeholder_with_classifier_is_not_degraded() {
        let placeholder = default_feature_output("Feature analysis could not be completed.");
        let result = ResultFusion::new().fuse(Some(&classifier(0.1)), &placeholder, 1);
        assert!(!result.degraded);
        assert_eq!(result.urgency, UrgencyLevel::Routine);
    }

    #[test]
    fn test_fusion_is_idempotent() {
        let fusion = ResultFusion::new();
        let c = classifier(0.63);
        let mut f = features(6.1);
        f.findings.blue_white_veil = true;

        let first = fusion.fuse(Some(&c), &f, 1);
        let second = fusion.fuse(Some(&c), &f, 1);
        assert_eq!(first, second);
        assert_eq!(first.combined_score.to_bits(), second.combined_score.to_bits());
    }

    #[test]
    fn test_degraded_result() {
        let result = ResultFusion::new().degraded_result(&AnalysisError::Timeout, 4);
        assert!(result.degraded);
        assert_eq!(result.confidence, MIN_CONFIDENCE);
        assert_eq!(result.attempts, 4);
        assert!(result
            .recommendation
            .contains(AnalysisError::Timeout.user_message()));
    }

    #[test]
    fn test_degraded_result_hides_detail() {
        let error = AnalysisError::NetworkError("connect to 10.0.0.7:443 refused".to_string());
        let result = ResultFusion::new().degraded_result(&error, 4);
        assert_eq!(
            result.features.findings.failure_reason.as_deref(),
            Some(error.user_message())
        );
        assert!(!result.recommendation.contains("10.0.0.7"));
        assert!(result.explanations.iter().all(|e| !e.message.contains("10.0.0.7")));
    }
}
