//! Configuration management for the fraud scoring service

use crate::types::prediction::RiskThresholds;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// How model artifacts are stored and evaluated
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// safetensors parameter sets evaluated in-process
    #[default]
    Native,
    /// ONNX graphs evaluated with ONNX Runtime
    Onnx,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub artifacts: ArtifactsConfig,
    pub scoring: ScoringConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Request/reply subject for score requests
    pub score_subject: String,
    /// Request/reply subject for readiness requests
    pub health_subject: String,
    /// Queue group shared by all scorer instances
    pub queue_group: String,
}

/// Model and scaler artifact locations
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory containing the artifacts
    pub models_dir: String,
    pub scaler_file: String,
    pub classifier_file: String,
    pub anomaly_file: String,
    #[serde(default)]
    pub format: ModelFormat,
    /// Prefixes removed from parameter names before binding
    #[serde(default = "default_strip_prefixes")]
    pub strip_prefixes: Vec<String>,
    /// Intra-op threads per ONNX session
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_strip_prefixes() -> Vec<String> {
    vec!["module.".to_string()]
}

fn default_onnx_threads() -> usize {
    1
}

/// Ensemble blend and decision thresholds.
///
/// Defaults are the values the deployed models were tuned with.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoringConfig {
    pub classifier_weight: f64,
    pub anomaly_weight: f64,
    /// Typical reconstruction error on legitimate traffic
    pub anomaly_threshold: f64,
    /// `is_fraud` when the final score is strictly above this
    pub fraud_threshold: f64,
    #[serde(default)]
    pub risk_levels: RiskThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            classifier_weight: 0.8,
            anomaly_weight: 0.2,
            anomaly_threshold: 0.0115,
            fraud_threshold: 0.5,
            risk_levels: RiskThresholds::default(),
        }
    }
}

/// Slack for weight pairs such as 0.7 + 0.3 that do not sum to exactly 1.0 in f64.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.classifier_weight >= 0.0 && self.anomaly_weight >= 0.0) {
            bail!("Ensemble weights must be non-negative");
        }
        let weight_sum = self.classifier_weight + self.anomaly_weight;
        if weight_sum > 1.0 + WEIGHT_SUM_TOLERANCE {
            bail!(
                "Ensemble weights must sum to at most 1 so scores stay in [0, 1], got {}",
                weight_sum
            );
        }
        if !(0.0..=1.0).contains(&self.fraud_threshold) {
            bail!("Fraud threshold must lie in [0, 1], got {}", self.fraud_threshold);
        }
        if !(self.anomaly_threshold > 0.0) {
            bail!("Anomaly threshold must be positive, got {}", self.anomaly_threshold);
        }
        let levels = &self.risk_levels;
        if !(levels.moderate < levels.high && levels.high < levels.critical) {
            bail!(
                "Risk thresholds must increase: moderate={} high={} critical={}",
                levels.moderate,
                levels.high,
                levels.critical
            );
        }
        Ok(())
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum concurrently scored requests
    pub workers: usize,
    /// Evaluate classifier and autoencoder concurrently
    #[serde(default = "default_parallel_models")]
    pub parallel_models: bool,
}

fn default_parallel_models() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path, with `FRAUD_SCORER__*` overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("FRAUD_SCORER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("artifacts.strip_prefixes")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scoring.validate().context("Invalid scoring configuration")?;
        if self.pipeline.workers == 0 {
            bail!("pipeline.workers must be at least 1");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                score_subject: "fraud.score".to_string(),
                health_subject: "fraud.health".to_string(),
                queue_group: "fraud-scorers".to_string(),
            },
            artifacts: ArtifactsConfig {
                models_dir: "models".to_string(),
                scaler_file: "quantile_scaler.json".to_string(),
                classifier_file: "Classifier.pt".to_string(),
                anomaly_file: "Autoencoder.pt".to_string(),
                format: ModelFormat::Native,
                strip_prefixes: default_strip_prefixes(),
                onnx_threads: 1,
            },
            scoring: ScoringConfig::default(),
            pipeline: PipelineConfig {
                workers: 4,
                parallel_models: true,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
            metrics: MetricsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.artifacts.format, ModelFormat::Native);
        assert_eq!(config.artifacts.strip_prefixes, vec!["module.".to_string()]);
        assert_eq!(config.scoring.classifier_weight, 0.8);
        assert_eq!(config.scoring.anomaly_weight, 0.2);
        assert_eq!(config.scoring.anomaly_threshold, 0.0115);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scoring_validation() {
        let mut scoring = ScoringConfig::default();
        scoring.risk_levels.high = 0.9;
        assert!(scoring.validate().is_err());

        let mut scoring = ScoringConfig::default();
        scoring.anomaly_threshold = 0.0;
        assert!(scoring.validate().is_err());

        let mut scoring = ScoringConfig::default();
        scoring.anomaly_weight = -0.1;
        assert!(scoring.validate().is_err());
    }

    #[test]
    fn test_weights_and_fraud_threshold_bounded() {
        let mut scoring = ScoringConfig::default();
        scoring.classifier_weight = 0.9;
        assert!(scoring.validate().is_err());

        let mut scoring = ScoringConfig::default();
        scoring.classifier_weight = 0.7;
        scoring.anomaly_weight = 0.3;
        assert!(scoring.validate().is_ok());

        let mut scoring = ScoringConfig::default();
        scoring.fraud_threshold = 1.5;
        assert!(scoring.validate().is_err());

        let mut scoring = ScoringConfig::default();
        scoring.fraud_threshold = f64::NAN;
        assert!(scoring.validate().is_err());

        assert!(ScoringConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[nats]
url = "nats://nats:4222"
score_subject = "s"
health_subject = "h"
queue_group = "q"

[artifacts]
models_dir = "/srv/models"
scaler_file = "scaler.json"
classifier_file = "clf.onnx"
anomaly_file = "ae.onnx"
format = "onnx"

[scoring]
classifier_weight = 0.8
anomaly_weight = 0.2
anomaly_threshold = 0.0115
fraud_threshold = 0.5

[pipeline]
workers = 2

[logging]
level = "debug"
format = "pretty"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.nats.url, "nats://nats:4222");
        assert_eq!(config.artifacts.format, ModelFormat::Onnx);
        assert_eq!(config.artifacts.onnx_threads, 1);
        assert_eq!(config.artifacts.strip_prefixes, vec!["module.".to_string()]);
        assert_eq!(config.scoring.risk_levels, RiskThresholds::default());
        assert!(config.pipeline.parallel_models);
        assert_eq!(config.metrics.report_interval_secs, 30);
    }
}
