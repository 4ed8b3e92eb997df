//! ONNX Runtime backed networks.
//!
//! Used when the trained networks are shipped as ONNX exports instead of
//! parameter sets. Each export takes a `[1, n_features]` float tensor; the
//! classifier returns the logit, the autoencoder the reconstruction.

use crate::error::ScoringError;
use crate::models::{AnomalyModel, FraudClassifier};
use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Loaded ONNX session with its I/O names
pub struct OnnxSession {
    name: String,
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    input_dim: usize,
}

impl OnnxSession {
    /// Load a single ONNX model from file
    pub fn load<P: AsRef<Path>>(path: P, name: &str, threads: usize, input_dim: usize) -> Result<Self> {
        let path = path.as_ref();

        info!(model = %name, path = %path.display(), threads = threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input".to_string());

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "output".to_string());

        info!(
            model = %name,
            input = %input_name,
            output = %output_name,
            "Model loaded successfully"
        );

        Ok(Self {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
            output_name,
            input_dim,
        })
    }

    /// Run the session on one sample and return the flattened output.
    fn run(&self, input: &[f32]) -> Result<Vec<f32>, ScoringError> {
        if input.len() != self.input_dim {
            return Err(ScoringError::DimensionMismatch {
                stage: "onnx model",
                expected: self.input_dim,
                actual: input.len(),
            });
        }

        // Prepare input tensor - shape [1, num_features]
        let shape = vec![1_i64, input.len() as i64];
        let input_tensor = Tensor::from_array((shape, input.to_vec()))
            .map_err(|e| ScoringError::model(&self.name, e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ScoringError::model(&self.name, format!("Lock error: {}", e)))?;

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| ScoringError::model(&self.name, e))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            ScoringError::model(&self.name, format!("missing output '{}'", self.output_name))
        })?;
        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ScoringError::model(&self.name, e))?;

        Ok(data.to_vec())
    }
}

/// Classifier evaluated from an ONNX export
pub struct OnnxClassifier {
    session: OnnxSession,
}

impl OnnxClassifier {
    pub fn new(session: OnnxSession) -> Self {
        Self { session }
    }
}

impl FraudClassifier for OnnxClassifier {
    fn name(&self) -> &str {
        &self.session.name
    }

    fn input_dim(&self) -> usize {
        self.session.input_dim
    }

    fn logit(&self, input: &[f32]) -> Result<f32, ScoringError> {
        let output = self.session.run(input)?;
        match output.as_slice() {
            [logit] => Ok(*logit),
            other => Err(ScoringError::model(
                self.name(),
                format!("expected a single logit, got {} values", other.len()),
            )),
        }
    }
}

/// Autoencoder evaluated from an ONNX export
pub struct OnnxAutoencoder {
    session: OnnxSession,
}

impl OnnxAutoencoder {
    pub fn new(session: OnnxSession) -> Self {
        Self { session }
    }
}

impl AnomalyModel for OnnxAutoencoder {
    fn name(&self) -> &str {
        &self.session.name
    }

    fn input_dim(&self) -> usize {
        self.session.input_dim
    }

    fn reconstruct(&self, input: &[f32]) -> Result<Vec<f32>, ScoringError> {
        let output = self.session.run(input)?;
        if output.len() != input.len() {
            return Err(ScoringError::DimensionMismatch {
                stage: "autoencoder reconstruction",
                expected: input.len(),
                actual: output.len(),
            });
        }
        Ok(output)
    }
}
