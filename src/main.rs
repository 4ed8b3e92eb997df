//! Fraud Scoring Service - Main Entry Point
//!
//! Answers NATS scoring requests with a blended classifier/autoencoder fraud
//! score. Requests are processed concurrently on a bounded worker pool.

use anyhow::Result;
use fraud_scoring_service::{
    config::AppConfig,
    consumer::ScoreRequestConsumer,
    error::ScoringError,
    metrics::{MetricsReporter, PipelineMetrics},
    models::InferenceEngine,
    producer::ResponsePublisher,
    Transaction,
};
use futures::StreamExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Waits for every spawned request task to finish, returning how many were
/// still running.
async fn drain_in_flight(tasks: &mut JoinSet<()>) -> usize {
    let mut drained = 0;
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Request task aborted");
        }
        drained += 1;
    }
    drained
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))?;

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Optional config path as first argument
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    init_logging(&config)?;

    info!("Starting Fraud Scoring Service");
    info!(
        classifier_weight = config.scoring.classifier_weight,
        anomaly_weight = config.scoring.anomaly_weight,
        anomaly_threshold = config.scoring.anomaly_threshold,
        fraud_threshold = config.scoring.fraud_threshold,
        "Configuration loaded"
    );

    let metrics = Arc::new(PipelineMetrics::new());

    let engine = Arc::new(InferenceEngine::from_config(&config)?.with_metrics(metrics.clone()));
    if !engine.is_ready() {
        warn!("Scoring requests will be answered with 503 until artifacts are provided");
    }

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = ScoreRequestConsumer::new(client.clone(), &config.nats);
    let publisher = ResponsePublisher::new(client.clone());

    let num_workers = config.pipeline.workers;
    info!(
        workers = num_workers,
        score_subject = consumer.score_subject(),
        health_subject = consumer.health_subject(),
        "Starting request processing loop"
    );

    // Semaphore to limit concurrent processing
    let semaphore = Arc::new(Semaphore::new(num_workers));

    let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
    tokio::spawn(reporter.start());

    let mut scores = consumer.subscribe_scores().await?;
    let mut health = consumer.subscribe_health().await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            Some(message) = scores.next() => {
                let semaphore = semaphore.clone();
                let engine = engine.clone();
                let publisher = publisher.clone();
                let metrics = metrics.clone();

                tasks.spawn(async move {
                    // Acquire permit (limits concurrent scoring)
                    let Ok(permit) = semaphore.acquire_owned().await else {
                        return;
                    };
                    let request_id = Uuid::new_v4();
                    let start_time = Instant::now();

                    let outcome = match serde_json::from_slice::<Transaction>(&message.payload) {
                        Ok(transaction) => {
                            let engine = engine.clone();
                            // Model evaluation is CPU bound
                            match tokio::task::spawn_blocking(move || engine.score(&transaction)).await {
                                Ok(outcome) => outcome,
                                Err(e) => Err(ScoringError::model("pipeline", e)),
                            }
                        }
                        Err(e) => Err(ScoringError::InvalidRequest(e.to_string())),
                    };
                    let processing_time = start_time.elapsed();

                    match &outcome {
                        Ok(result) => {
                            metrics.record_prediction(processing_time, result);
                            if result.is_fraud {
                                info!(
                                    request_id = %request_id,
                                    fraud_probability = result.final_score,
                                    risk_level = result.risk_level.as_str(),
                                    processing_time_us = processing_time.as_micros(),
                                    "Transaction flagged as fraud"
                                );
                            } else {
                                debug!(
                                    request_id = %request_id,
                                    fraud_probability = result.final_score,
                                    processing_time_us = processing_time.as_micros(),
                                    "Transaction scored"
                                );
                            }

                            let count = metrics.requests_scored.load(Ordering::Relaxed);
                            // Log progress every 100 requests
                            if count % 100 == 0 {
                                let processing_stats = metrics.get_processing_stats();
                                info!(
                                    scored = count,
                                    throughput = format!("{:.1} req/s", metrics.get_throughput()),
                                    avg_latency_us = processing_stats.mean_us,
                                    "Processing milestone"
                                );
                            }
                        }
                        Err(e) => {
                            metrics.record_failure(e);
                            if e.status_code() >= 500 && !matches!(e, ScoringError::NotReady { .. }) {
                                error!(request_id = %request_id, error = %e, "Scoring failed");
                            } else {
                                warn!(request_id = %request_id, status = e.status_code(), error = %e, "Request rejected");
                            }
                        }
                    }

                    match message.reply {
                        Some(reply) => {
                            if let Err(e) = publisher.reply_score(reply, &outcome).await {
                                error!(request_id = %request_id, error = %e, "Failed to publish score reply");
                            }
                        }
                        None => debug!(request_id = %request_id, "Request without reply subject"),
                    }

                    // Release permit when done
                    drop(permit);
                });
            }
            Some(message) = health.next() => {
                if let Some(reply) = message.reply {
                    if let Err(e) = publisher.reply_health(reply, &engine.readiness()).await {
                        error!(error = %e, "Failed to publish readiness reply");
                    }
                }
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Request task aborted");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            else => break,
        }
    }

    info!(in_flight = tasks.len(), "Scoring service shutting down...");
    let drained = drain_in_flight(&mut tasks).await;
    debug!(drained, "In-flight requests completed");
    if let Err(e) = client.flush().await {
        warn!(error = %e, "Failed to flush pending replies");
    }
    metrics.print_summary();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_drain_waits_for_running_requests() {
        let semaphore = Arc::new(Semaphore::new(2));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for i in 0..5u64 {
            let semaphore = semaphore.clone();
            let completed = completed.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                tokio::time::sleep(Duration::from_millis(10 * (i + 1))).await;
                completed.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(drain_in_flight(&mut tasks).await, 5);
        assert_eq!(completed.load(Ordering::SeqCst), 5);
        assert_eq!(semaphore.available_permits(), 2);
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_drain_reports_aborted_requests() {
        let mut tasks = JoinSet::new();
        tasks.spawn(std::future::pending::<()>());
        tasks.abort_all();

        assert_eq!(drain_in_flight(&mut tasks).await, 1);
        assert_eq!(drain_in_flight(&mut tasks).await, 0);
    }
}
