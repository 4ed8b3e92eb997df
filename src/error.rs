//! Error taxonomy for the scoring pipeline

use thiserror::Error;

/// Failures that can occur while scoring a transaction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    /// Scaler and/or classifier were never loaded.
    #[error("System not ready (missing: {})", missing.join(", "))]
    NotReady { missing: Vec<&'static str> },

    /// An engineered column required by the fixed feature order is absent.
    #[error("Column order error: missing engineered column '{column}'")]
    FeatureOrder { column: String },

    /// A vector of the wrong width reached a pipeline stage.
    #[error("{stage}: expected {expected} values, got {actual}")]
    DimensionMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    /// NaN or infinity produced somewhere in the pipeline.
    #[error("{stage}: non-finite value at index {index} ({column})")]
    NonFinite {
        stage: &'static str,
        index: usize,
        column: String,
    },

    /// A model backend failed to evaluate.
    #[error("{model} inference failed: {message}")]
    Model { model: String, message: String },

    /// The request payload could not be decoded.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ScoringError {
    /// Boundary status signal for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ScoringError::NotReady { .. } => 503,
            ScoringError::InvalidRequest(_) => 400,
            _ => 500,
        }
    }

    /// Short machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self.status_code() {
            503 => "service_unavailable",
            400 => "bad_request",
            _ => "internal_error",
        }
    }

    pub fn model(model: impl Into<String>, message: impl ToString) -> Self {
        ScoringError::Model {
            model: model.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let not_ready = ScoringError::NotReady {
            missing: vec!["scaler", "classifier"],
        };
        assert_eq!(not_ready.status_code(), 503);
        assert_eq!(not_ready.kind(), "service_unavailable");
        assert_eq!(
            not_ready.to_string(),
            "System not ready (missing: scaler, classifier)"
        );

        let order = ScoringError::FeatureOrder {
            column: "V_std".to_string(),
        };
        assert_eq!(order.status_code(), 500);
        assert_eq!(order.kind(), "internal_error");

        let bad = ScoringError::InvalidRequest("missing field `Time`".to_string());
        assert_eq!(bad.status_code(), 400);
    }
}
