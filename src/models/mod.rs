//! Scoring networks, their loading, and the ensemble

pub mod autoencoder;
pub mod classifier;
pub mod ensemble;
pub mod inference;
pub mod layers;
pub mod loader;
pub mod onnx;
pub mod params;

use crate::error::ScoringError;

pub use ensemble::EnsembleScorer;
pub use inference::{InferenceEngine, ModelContext};
pub use loader::ModelLoader;

/// Supervised model producing a fraud logit for one scaled feature vector.
///
/// Implementations are immutable after loading and shared across requests.
pub trait FraudClassifier: Send + Sync {
    fn name(&self) -> &str;

    fn input_dim(&self) -> usize;

    fn logit(&self, input: &[f32]) -> Result<f32, ScoringError>;
}

/// Unsupervised model reconstructing a scaled feature vector.
pub trait AnomalyModel: Send + Sync {
    fn name(&self) -> &str;

    fn input_dim(&self) -> usize;

    fn reconstruct(&self, input: &[f32]) -> Result<Vec<f32>, ScoringError>;
}
