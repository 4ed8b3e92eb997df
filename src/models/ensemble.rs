//! Blending of classifier probability and reconstruction error

use crate::config::ScoringConfig;
use crate::types::prediction::{PredictionResult, RiskLevel};

/// Mean squared error between an input and its reconstruction.
pub fn reconstruction_error(input: &[f32], reconstruction: &[f32]) -> f64 {
    if input.is_empty() {
        return 0.0;
    }
    let sum: f64 = input
        .iter()
        .zip(reconstruction)
        .map(|(&x, &r)| {
            let d = x as f64 - r as f64;
            d * d
        })
        .sum();
    sum / input.len() as f64
}

/// Combines classifier and anomaly outputs into one risk assessment.
#[derive(Debug, Clone, Default)]
pub struct EnsembleScorer {
    config: ScoringConfig,
}

impl EnsembleScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Map a reconstruction error into [0, 1]; twice the threshold saturates.
    pub fn normalize_anomaly(&self, mse: f64) -> f64 {
        (mse / (self.config.anomaly_threshold * 2.0)).min(1.0)
    }

    /// Weighted blend of the two signals.
    pub fn blend(&self, classifier_prob: f64, normalized_anomaly: f64) -> f64 {
        self.config.anomaly_weight * normalized_anomaly + self.config.classifier_weight * classifier_prob
    }

    /// Score a transaction from its model outputs.
    ///
    /// `anomaly_mse` is `None` when no autoencoder is loaded; the anomaly
    /// terms are then zero and the result is classifier-only.
    pub fn assess(&self, classifier_prob: f64, anomaly_mse: Option<f64>) -> PredictionResult {
        let (anomaly_score, normalized_anomaly) = match anomaly_mse {
            Some(mse) => (mse, self.normalize_anomaly(mse)),
            None => (0.0, 0.0),
        };

        let final_score = self.blend(classifier_prob, normalized_anomaly);

        PredictionResult {
            classifier_score: classifier_prob,
            anomaly_score,
            normalized_anomaly,
            final_score,
            is_fraud: final_score > self.config.fraud_threshold,
            risk_level: RiskLevel::from_score(final_score, &self.config.risk_levels),
        }
    }
}
