//! Fraud Scoring Service Library
//!
//! Real-time credit-card fraud scoring: feature engineering over anonymized
//! card transactions, quantile scaling, and an ensemble of a residual
//! classifier with a reconstruction autoencoder.

pub mod config;
pub mod consumer;
pub mod error;
pub mod feature_extractor;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod scaler;
pub mod types;

pub use config::AppConfig;
pub use consumer::ScoreRequestConsumer;
pub use error::ScoringError;
pub use feature_extractor::{FeatureExtractor, FeatureVector};
pub use models::{InferenceEngine, ModelContext, ModelLoader};
pub use producer::ResponsePublisher;
pub use scaler::{FeatureScaler, Preprocessor, QuantileScaler};
pub use types::{PredictionResult, ReadinessReport, RiskLevel, ScoreResponse, Transaction};
