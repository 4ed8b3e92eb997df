//! NATS subscriptions for scoring and health requests

use crate::config::NatsConfig;
use anyhow::Result;
use async_nats::{Client, Subscriber};
use tracing::info;

/// Consumer for request/reply traffic addressed to the scoring service
pub struct ScoreRequestConsumer {
    client: Client,
    score_subject: String,
    health_subject: String,
    queue_group: String,
}

impl ScoreRequestConsumer {
    pub fn new(client: Client, nats: &NatsConfig) -> Self {
        Self {
            client,
            score_subject: nats.score_subject.clone(),
            health_subject: nats.health_subject.clone(),
            queue_group: nats.queue_group.clone(),
        }
    }

    /// Subscribe to scoring requests; replicas share the load through the queue group
    pub async fn subscribe_scores(&self) -> Result<Subscriber> {
        let subscriber = self
            .client
            .queue_subscribe(self.score_subject.clone(), self.queue_group.clone())
            .await?;
        info!(
            subject = %self.score_subject,
            queue_group = %self.queue_group,
            "Subscribed to scoring requests"
        );
        Ok(subscriber)
    }

    /// Subscribe to readiness requests; every replica answers its own
    pub async fn subscribe_health(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.health_subject.clone()).await?;
        info!(subject = %self.health_subject, "Subscribed to health requests");
        Ok(subscriber)
    }

    pub fn score_subject(&self) -> &str {
        &self.score_subject
    }

    pub fn health_subject(&self) -> &str {
        &self.health_subject
    }
}
