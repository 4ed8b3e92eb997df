//! Scoring Client
//!
//! Generates card transactions and sends them to the scoring service as NATS
//! requests, logging each reply.

use chrono::{Timelike, Utc};
use fraud_scoring_service::types::{ErrorResponse, ReadinessReport, ScoreResponse};
use fraud_scoring_service::Transaction;
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

/// Transaction generator for testing
struct TransactionGenerator {
    rng: rand::rngs::ThreadRng,
}

impl TransactionGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
        }
    }

    /// Generate a random legitimate transaction during the current hour
    fn generate_legitimate(&mut self) -> Transaction {
        let time = Utc::now().num_seconds_from_midnight() as f64;
        let mut tx = Transaction::new(time, self.rng.gen_range(1.0..250.0));
        for index in 1..=28 {
            tx = tx.with_v(index, self.rng.gen_range(-1.5..1.5));
        }
        tx
    }

    /// Generate a suspicious transaction: night time, extreme PCA components
    fn generate_suspicious(&mut self) -> Transaction {
        let time = self.rng.gen_range(0.0..6.0 * 3600.0);
        let mut tx = Transaction::new(time, self.rng.gen_range(0.0..20.0));
        for index in 1..=28 {
            tx = tx.with_v(index, self.rng.gen_range(-1.0..1.0));
        }
        // Components that separate fraud most strongly
        tx.with_v(14, self.rng.gen_range(-12.0..-5.0))
            .with_v(12, self.rng.gen_range(-10.0..-4.0))
            .with_v(10, self.rng.gen_range(-8.0..-3.0))
            .with_v(17, self.rng.gen_range(-15.0..-5.0))
            .with_v(4, self.rng.gen_range(3.0..8.0))
            .with_v(11, self.rng.gen_range(2.5..7.0))
            .with_v(3, self.rng.gen_range(-10.0..-3.0))
    }
}

fn log_reply(index: u64, payload: &[u8]) {
    if let Ok(score) = serde_json::from_slice::<ScoreResponse>(payload) {
        info!(
            request = index,
            fraud_probability = score.fraud_probability,
            is_fraud = score.is_fraud,
            risk_level = score.risk_level.as_str(),
            classifier_score = score.details.classifier_score,
            anomaly_score = score.details.anomaly_score,
            "Score received"
        );
    } else if let Ok(err) = serde_json::from_slice::<ErrorResponse>(payload) {
        warn!(request = index, status = err.status, error = %err.error, detail = %err.detail, "Scoring refused");
    } else {
        warn!(request = index, "Unrecognized reply");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("score_client=info".parse()?),
        )
        .init();

    info!("Starting Scoring Client");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("fraud.score");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let fraud_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.1);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);
    let health_subject = args.get(6).map(|s| s.as_str()).unwrap_or("fraud.health");

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        fraud_rate = fraud_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, fraud_rate, delay_ms).await;
        }
    };

    match client.request(health_subject.to_string(), "".into()).await {
        Ok(reply) => match serde_json::from_slice::<ReadinessReport>(&reply.payload) {
            Ok(report) => info!(ready = report.ready, missing = ?report.missing, "Service readiness"),
            Err(e) => warn!(error = %e, "Malformed readiness reply"),
        },
        Err(e) => warn!(error = %e, "Readiness check failed"),
    }

    let mut generator = TransactionGenerator::new();
    let mut rng = rand::thread_rng();

    let mut legitimate_count = 0;
    let mut suspicious_count = 0;

    for i in 0..count {
        let transaction = if rng.gen_bool(fraud_rate) {
            suspicious_count += 1;
            generator.generate_suspicious()
        } else {
            legitimate_count += 1;
            generator.generate_legitimate()
        };

        let payload = serde_json::to_vec(&transaction)?;

        match client.request(subject.to_string(), payload.into()).await {
            Ok(reply) => log_reply(i + 1, &reply.payload),
            Err(e) => warn!(request = i + 1, error = %e, "Request failed"),
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(
        "Completed! Sent {} transactions ({} legitimate, {} suspicious)",
        count, legitimate_count, suspicious_count
    );

    Ok(())
}

async fn run_dry_mode(count: u64, fraud_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = TransactionGenerator::new();
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let transaction = if rng.gen_bool(fraud_rate) {
            generator.generate_suspicious()
        } else {
            generator.generate_legitimate()
        };

        let json = serde_json::to_string_pretty(&transaction)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample transaction {}:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
