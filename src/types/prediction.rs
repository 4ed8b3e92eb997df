//! Prediction results and boundary response types

use crate::error::ScoringError;
use serde::{Deserialize, Serialize};

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    /// Determine risk level from a final score.
    ///
    /// Thresholds are exclusive and evaluated from the highest down.
    pub fn from_score(score: f64, thresholds: &RiskThresholds) -> Self {
        if score > thresholds.critical {
            RiskLevel::Critical
        } else if score > thresholds.high {
            RiskLevel::High
        } else if score > thresholds.moderate {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

/// Configurable risk level thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            moderate: 0.2,
            high: 0.5,
            critical: 0.8,
        }
    }
}

/// Outcome of scoring one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    /// Sigmoid of the classifier logit
    pub classifier_score: f64,
    /// Mean squared reconstruction error (0 without an autoencoder)
    pub anomaly_score: f64,
    /// Reconstruction error normalized into [0, 1]
    pub normalized_anomaly: f64,
    /// Blended fraud probability
    pub final_score: f64,
    pub is_fraud: bool,
    pub risk_level: RiskLevel,
}

impl PredictionResult {
    pub fn to_response(&self) -> ScoreResponse {
        ScoreResponse::from(self)
    }
}

/// Score response returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub fraud_probability: f64,
    pub is_fraud: bool,
    pub risk_level: RiskLevel,
    pub details: ScoreDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetails {
    pub classifier_score: f64,
    pub anomaly_score: f64,
    pub normalized_anomaly: f64,
}

impl From<&PredictionResult> for ScoreResponse {
    fn from(result: &PredictionResult) -> Self {
        Self {
            fraud_probability: result.final_score,
            is_fraud: result.is_fraud,
            risk_level: result.risk_level,
            details: ScoreDetails {
                classifier_score: result.classifier_score,
                anomaly_score: result.anomaly_score,
                normalized_anomaly: result.normalized_anomaly,
            },
        }
    }
}

/// Uniform error body for rejected or failed requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// `service_unavailable`, `internal_error` or `bad_request`
    pub error: String,
    pub status: u16,
    pub detail: String,
}

impl From<&ScoringError> for ErrorResponse {
    fn from(err: &ScoringError) -> Self {
        Self {
            error: err.kind().to_string(),
            status: err.status_code(),
            detail: err.to_string(),
        }
    }
}

/// Which pipeline components are loaded and whether scoring is possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub scaler_loaded: bool,
    pub classifier_loaded: bool,
    pub anomaly_loaded: bool,
    pub missing: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_from_score() {
        let thresholds = RiskThresholds::default();

        assert_eq!(RiskLevel::from_score(0.1, &thresholds), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.35, &thresholds), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_score(0.65, &thresholds), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.95, &thresholds), RiskLevel::Critical);
    }

    #[test]
    fn test_risk_level_boundaries_are_exclusive() {
        let thresholds = RiskThresholds::default();

        assert_eq!(RiskLevel::from_score(0.2, &thresholds), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.5, &thresholds), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_score(0.5001, &thresholds), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.8, &thresholds), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.8001, &thresholds), RiskLevel::Critical);
    }

    #[test]
    fn test_score_response_shape() {
        let result = PredictionResult {
            classifier_score: 0.9,
            anomaly_score: 0.01,
            normalized_anomaly: 0.5,
            final_score: 0.82,
            is_fraud: true,
            risk_level: RiskLevel::Critical,
        };

        let json = serde_json::to_value(result.to_response()).unwrap();

        assert_eq!(json["fraud_probability"], 0.82);
        assert_eq!(json["is_fraud"], true);
        assert_eq!(json["risk_level"], "CRITICAL");
        assert_eq!(json["details"]["classifier_score"], 0.9);
        assert_eq!(json["details"]["anomaly_score"], 0.01);
        assert_eq!(json["details"]["normalized_anomaly"], 0.5);
    }

    #[test]
    fn test_error_response_from_scoring_error() {
        let err = ScoringError::NotReady {
            missing: vec!["scaler"],
        };
        let body = ErrorResponse::from(&err);

        assert_eq!(body.status, 503);
        assert_eq!(body.error, "service_unavailable");
        assert!(body.detail.contains("scaler"));
    }
}
