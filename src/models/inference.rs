//! Scoring orchestration: feature engineering, scaling, both networks, ensemble.

use crate::config::{AppConfig, ScoringConfig};
use crate::error::ScoringError;
use crate::feature_extractor::FeatureExtractor;
use crate::metrics::PipelineMetrics;
use crate::models::ensemble::{reconstruction_error, EnsembleScorer};
use crate::models::layers::sigmoid;
use crate::models::loader::ModelLoader;
use crate::models::{AnomalyModel, FraudClassifier};
use crate::scaler::{FeatureScaler, Preprocessor};
use crate::types::prediction::{PredictionResult, ReadinessReport};
use crate::types::transaction::Transaction;
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Read-only artifacts the engine scores with.
///
/// Built once at startup (or by tests with mock components) and handed to
/// [`InferenceEngine::new`].
#[derive(Clone, Default)]
pub struct ModelContext {
    pub scaler: Option<Arc<dyn FeatureScaler>>,
    pub classifier: Option<Arc<dyn FraudClassifier>>,
    pub anomaly: Option<Arc<dyn AnomalyModel>>,
}

impl ModelContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scaler(mut self, scaler: Arc<dyn FeatureScaler>) -> Self {
        self.scaler = Some(scaler);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FraudClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_anomaly(mut self, anomaly: Arc<dyn AnomalyModel>) -> Self {
        self.anomaly = Some(anomaly);
        self
    }
}

/// Scores transactions against the loaded scaler and networks.
///
/// Shared by all request handlers; nothing in it is mutated after
/// construction.
pub struct InferenceEngine {
    extractor: FeatureExtractor,
    preprocessor: Preprocessor,
    classifier: Option<Arc<dyn FraudClassifier>>,
    anomaly: Option<Arc<dyn AnomalyModel>>,
    ensemble: EnsembleScorer,
    /// Evaluate classifier and autoencoder on separate threads
    parallel_models: bool,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl InferenceEngine {
    pub fn new(context: ModelContext, scoring: ScoringConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(),
            preprocessor: Preprocessor::new(context.scaler),
            classifier: context.classifier,
            anomaly: context.anomaly,
            ensemble: EnsembleScorer::new(scoring),
            parallel_models: false,
            metrics: None,
        }
    }

    /// Load artifacts per configuration and build the engine.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.scoring.validate()?;
        let loader = ModelLoader::new(&config.artifacts)?;
        let context = loader.load_context(&config.artifacts);

        let engine = Self::new(context, config.scoring.clone())
            .with_parallel_models(config.pipeline.parallel_models);

        let readiness = engine.readiness();
        if readiness.ready {
            info!(
                anomaly_loaded = readiness.anomaly_loaded,
                parallel_models = engine.parallel_models,
                "Inference engine ready"
            );
        } else {
            warn!(missing = ?readiness.missing, "Inference engine not ready");
        }

        Ok(engine)
    }

    pub fn with_parallel_models(mut self, parallel: bool) -> Self {
        self.parallel_models = parallel;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn ensemble(&self) -> &EnsembleScorer {
        &self.ensemble
    }

    fn missing_components(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.preprocessor.is_loaded() {
            missing.push("scaler");
        }
        if self.classifier.is_none() {
            missing.push("classifier");
        }
        missing
    }

    /// Scoring requires the scaler and the classifier; the autoencoder is optional.
    pub fn is_ready(&self) -> bool {
        self.missing_components().is_empty()
    }

    pub fn readiness(&self) -> ReadinessReport {
        let missing = self.missing_components();
        ReadinessReport {
            ready: missing.is_empty(),
            scaler_loaded: self.preprocessor.is_loaded(),
            classifier_loaded: self.classifier.is_some(),
            anomaly_loaded: self.anomaly.is_some(),
            missing: missing.into_iter().map(String::from).collect(),
        }
    }

    /// Score a single transaction.
    pub fn score(&self, tx: &Transaction) -> Result<PredictionResult, ScoringError> {
        let classifier = match &self.classifier {
            Some(classifier) if self.preprocessor.is_loaded() => classifier,
            _ => {
                return Err(ScoringError::NotReady {
                    missing: self.missing_components(),
                })
            }
        };

        let features = self.extractor.extract(tx)?;
        let scaled = self.preprocessor.transform(features.values())?;
        let input: Vec<f32> = scaled.iter().map(|&v| v as f32).collect();

        let (classifier_prob, anomaly_mse) = match &self.anomaly {
            Some(anomaly) if self.parallel_models => {
                let (clf, ae) = rayon::join(
                    || self.run_classifier(classifier.as_ref(), &input),
                    || self.run_anomaly(anomaly.as_ref(), &input),
                );
                (clf?, Some(ae?))
            }
            Some(anomaly) => (
                self.run_classifier(classifier.as_ref(), &input)?,
                Some(self.run_anomaly(anomaly.as_ref(), &input)?),
            ),
            None => (self.run_classifier(classifier.as_ref(), &input)?, None),
        };

        let result = self.ensemble.assess(classifier_prob, anomaly_mse);

        debug!(
            classifier_score = result.classifier_score,
            anomaly_score = result.anomaly_score,
            final_score = result.final_score,
            risk_level = result.risk_level.as_str(),
            "Transaction scored"
        );

        Ok(result)
    }

    /// Score several transactions; each result is independent.
    pub fn score_batch(&self, transactions: &[Transaction]) -> Vec<Result<PredictionResult, ScoringError>> {
        transactions.iter().map(|tx| self.score(tx)).collect()
    }

    fn run_classifier(&self, classifier: &dyn FraudClassifier, input: &[f32]) -> Result<f64, ScoringError> {
        let start = Instant::now();
        let logit = classifier.logit(input)?;
        self.record_model_time(classifier.name(), start);

        if !logit.is_finite() {
            return Err(ScoringError::NonFinite {
                stage: "classifier",
                index: 0,
                column: "logit".to_string(),
            });
        }
        Ok(sigmoid(logit) as f64)
    }

    fn run_anomaly(&self, anomaly: &dyn AnomalyModel, input: &[f32]) -> Result<f64, ScoringError> {
        let start = Instant::now();
        let reconstruction = anomaly.reconstruct(input)?;
        self.record_model_time(anomaly.name(), start);

        if reconstruction.len() != input.len() {
            return Err(ScoringError::DimensionMismatch {
                stage: "autoencoder reconstruction",
                expected: input.len(),
                actual: reconstruction.len(),
            });
        }
        if let Some(index) = reconstruction.iter().position(|v| !v.is_finite()) {
            return Err(ScoringError::NonFinite {
                stage: "autoencoder",
                index,
                column: self.extractor.feature_names()[index].clone(),
            });
        }

        Ok(reconstruction_error(input, &reconstruction))
    }

    fn record_model_time(&self, model: &str, start: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_model_time(model, start.elapsed());
        }
    }
}
