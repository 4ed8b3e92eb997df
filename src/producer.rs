//! Reply publishing for scoring and health requests

use crate::error::ScoringError;
use crate::types::prediction::{ErrorResponse, PredictionResult, ReadinessReport, ScoreResponse};
use anyhow::Result;
use async_nats::{Client, Subject};
use serde::Serialize;
use tracing::debug;

/// Serialize the reply body for a scoring outcome
pub fn score_reply_payload(outcome: &Result<PredictionResult, ScoringError>) -> Result<Vec<u8>> {
    let payload = match outcome {
        Ok(result) => serde_json::to_vec(&ScoreResponse::from(result))?,
        Err(e) => serde_json::to_vec(&ErrorResponse::from(e))?,
    };
    Ok(payload)
}

/// Publisher answering requests on their reply subjects
#[derive(Clone)]
pub struct ResponsePublisher {
    client: Client,
}

impl ResponsePublisher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn publish_json<T: Serialize>(&self, reply: Subject, body: &T) -> Result<()> {
        let payload = serde_json::to_vec(body)?;
        self.client.publish(reply, payload.into()).await?;
        Ok(())
    }

    /// Reply with a score or an error body
    pub async fn reply_score(
        &self,
        reply: Subject,
        outcome: &Result<PredictionResult, ScoringError>,
    ) -> Result<()> {
        let payload = score_reply_payload(outcome)?;
        debug!(reply = %reply, ok = outcome.is_ok(), "Publishing score reply");
        self.client.publish(reply, payload.into()).await?;
        Ok(())
    }

    /// Reply to a readiness request
    pub async fn reply_health(&self, reply: Subject, report: &ReadinessReport) -> Result<()> {
        debug!(reply = %reply, ready = report.ready, "Publishing readiness reply");
        self.publish_json(reply, report).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::prediction::RiskLevel;

    #[test]
    fn test_success_payload() {
        let outcome = Ok(PredictionResult {
            classifier_score: 0.9,
            anomaly_score: 0.01,
            normalized_anomaly: 0.5,
            final_score: 0.82,
            is_fraud: true,
            risk_level: RiskLevel::Critical,
        });

        let body: serde_json::Value = serde_json::from_slice(&score_reply_payload(&outcome).unwrap()).unwrap();
        assert_eq!(body["fraud_probability"], 0.82);
        assert_eq!(body["is_fraud"], true);
        assert_eq!(body["risk_level"], "CRITICAL");
        assert_eq!(body["details"]["normalized_anomaly"], 0.5);
    }

    #[test]
    fn test_error_payload() {
        let outcome = Err(ScoringError::NotReady { missing: vec!["scaler"] });

        let body: serde_json::Value = serde_json::from_slice(&score_reply_payload(&outcome).unwrap()).unwrap();
        assert_eq!(body["status"], 503);
        assert_eq!(body["error"], "service_unavailable");
        assert!(body.get("fraud_probability").is_none());
    }
}
