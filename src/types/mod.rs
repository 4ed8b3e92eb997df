//! Type definitions for the fraud scoring service

pub mod prediction;
pub mod transaction;

pub use prediction::{
    ErrorResponse, PredictionResult, ReadinessReport, RiskLevel, RiskThresholds, ScoreDetails,
    ScoreResponse,
};
pub use transaction::Transaction;
