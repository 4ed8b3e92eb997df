//! Artifact resolution and loading of the scaler and both networks.
//!
//! Missing or unreadable artifacts never abort startup: they leave the
//! corresponding slot of the [`ModelContext`] empty and the engine reports
//! degraded readiness.

use crate::config::{ArtifactsConfig, ModelFormat};
use crate::feature_extractor::FeatureExtractor;
use crate::models::autoencoder::{Autoencoder, AutoencoderShape};
use crate::models::classifier::{ClassifierShape, ResNetClassifier};
use crate::models::inference::ModelContext;
use crate::models::onnx::{OnnxAutoencoder, OnnxClassifier, OnnxSession};
use crate::models::params::ParamStore;
use crate::models::{AnomalyModel, FraudClassifier};
use crate::scaler::{FeatureScaler, QuantileScaler};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Loader for the scaler and model artifacts
pub struct ModelLoader {
    format: ModelFormat,
    strip_prefixes: Vec<String>,
    /// Number of threads for ONNX inference
    onnx_threads: usize,
    classifier_shape: ClassifierShape,
    autoencoder_shape: AutoencoderShape,
}

impl ModelLoader {
    /// Create a loader for the configured artifact format
    pub fn new(artifacts: &ArtifactsConfig) -> Result<Self> {
        if artifacts.format == ModelFormat::Onnx {
            // Initialize ONNX Runtime
            ort::init().commit()?;
            info!(onnx_threads = artifacts.onnx_threads, "ONNX Runtime initialized");
        }

        Ok(Self {
            format: artifacts.format,
            strip_prefixes: artifacts.strip_prefixes.clone(),
            onnx_threads: artifacts.onnx_threads.max(1),
            classifier_shape: ClassifierShape::default(),
            autoencoder_shape: AutoencoderShape::default(),
        })
    }

    /// Override the network widths (the input width must match the feature count).
    pub fn with_shapes(mut self, classifier: ClassifierShape, autoencoder: AutoencoderShape) -> Self {
        self.classifier_shape = classifier;
        self.autoencoder_shape = autoencoder;
        self
    }

    /// Locate an artifact on local storage.
    pub fn resolve_artifact(models_dir: impl AsRef<Path>, filename: &str) -> Option<PathBuf> {
        let path = models_dir.as_ref().join(filename);
        if path.is_file() {
            info!(path = %path.display(), "Found local artifact");
            Some(path)
        } else {
            warn!(path = %path.display(), "Artifact not found");
            None
        }
    }

    /// Load the quantile scaler and verify its column alignment.
    pub fn load_scaler(&self, path: &Path) -> Result<Arc<dyn FeatureScaler>> {
        let scaler = QuantileScaler::from_file(path)?;
        scaler.check_alignment(FeatureExtractor::new().feature_names())?;
        Ok(Arc::new(scaler))
    }

    pub fn load_classifier(&self, path: &Path) -> Result<Arc<dyn FraudClassifier>> {
        let shape = self.classifier_shape;
        let model: Arc<dyn FraudClassifier> = match self.format {
            ModelFormat::Native => {
                let params = ParamStore::from_file(path, &self.strip_prefixes)?;
                Arc::new(ResNetClassifier::from_params("classifier", params, shape)?)
            }
            ModelFormat::Onnx => {
                let session = OnnxSession::load(path, "classifier", self.onnx_threads, shape.input_dim)?;
                Arc::new(OnnxClassifier::new(session))
            }
        };
        Ok(model)
    }

    pub fn load_anomaly(&self, path: &Path) -> Result<Arc<dyn AnomalyModel>> {
        let shape = self.autoencoder_shape;
        let model: Arc<dyn AnomalyModel> = match self.format {
            ModelFormat::Native => {
                let params = ParamStore::from_file(path, &self.strip_prefixes)?;
                Arc::new(Autoencoder::from_params("autoencoder", params, shape)?)
            }
            ModelFormat::Onnx => {
                let session = OnnxSession::load(path, "autoencoder", self.onnx_threads, shape.input_dim)?;
                Arc::new(OnnxAutoencoder::new(session))
            }
        };
        Ok(model)
    }

    /// Load every configured artifact that is present and valid.
    pub fn load_context(&self, artifacts: &ArtifactsConfig) -> ModelContext {
        let dir = Path::new(&artifacts.models_dir);
        let mut context = ModelContext::new();

        if let Some(path) = Self::resolve_artifact(dir, &artifacts.scaler_file) {
            match self.load_scaler(&path) {
                Ok(scaler) => context = context.with_scaler(scaler),
                Err(e) => error!(path = %path.display(), error = %format!("{:#}", e), "Failed to load scaler"),
            }
        }
        if context.scaler.is_none() {
            warn!("Scaler missing, scoring requests will be rejected");
        }

        if let Some(path) = Self::resolve_artifact(dir, &artifacts.classifier_file) {
            match self.load_classifier(&path) {
                Ok(model) => {
                    info!(model = model.name(), format = ?self.format, "Classifier loaded");
                    context = context.with_classifier(model);
                }
                Err(e) => error!(path = %path.display(), error = %format!("{:#}", e), "Failed to load classifier"),
            }
        }
        if context.classifier.is_none() {
            warn!("Classifier weights missing, scoring requests will be rejected");
        }

        if let Some(path) = Self::resolve_artifact(dir, &artifacts.anomaly_file) {
            match self.load_anomaly(&path) {
                Ok(model) => {
                    info!(model = model.name(), format = ?self.format, "Autoencoder loaded");
                    context = context.with_anomaly(model);
                }
                Err(e) => error!(path = %path.display(), error = %format!("{:#}", e), "Failed to load autoencoder"),
            }
        }
        if context.anomaly.is_none() {
            warn!("Autoencoder missing, scoring falls back to classifier only");
        }

        context
    }
}
