//! Feature engineering for fraud model inference.
//!
//! Turns a raw [`Transaction`] into the 62-column vector the scaler and
//! both networks were fit on. Column order is fixed and must match the
//! training pipeline exactly; the vector is aligned by position downstream.

use crate::error::ScoringError;
use crate::types::transaction::{Transaction, V_FEATURE_COUNT};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::f64::consts::PI;

/// Number of engineered features produced per transaction.
pub const FEATURE_COUNT: usize = 62;

/// `V*` components whose pairwise products are used as interaction terms.
pub const TOP_V: [usize; 7] = [17, 14, 12, 10, 4, 3, 11];

static FEATURE_NAMES: Lazy<Vec<String>> = Lazy::new(|| {
    let mut names = Vec::with_capacity(FEATURE_COUNT);

    // Original columns (minus Time)
    names.extend((1..=V_FEATURE_COUNT).map(|i| format!("V{}", i)));
    names.push("Amount".to_string());

    // Engineered columns
    names.push("Hour_sin".to_string());
    names.push("Hour_cos".to_string());
    names.push("Amount_log".to_string());
    for (a, b) in interaction_pairs() {
        names.push(interaction_name(a, b));
    }
    names.push("V_std".to_string());
    names.push("V_max".to_string());

    names
});

/// Upper-triangular pairs of [`TOP_V`], self-products included.
fn interaction_pairs() -> impl Iterator<Item = (usize, usize)> {
    TOP_V
        .iter()
        .enumerate()
        .flat_map(|(i, &a)| TOP_V[i..].iter().map(move |&b| (a, b)))
}

fn interaction_name(a: usize, b: usize) -> String {
    format!("I_V{}_V{}", a, b)
}

/// Hour of day from a seconds offset: `floor(time / 3600) mod 24`.
pub fn hour_of_day(time: f64) -> f64 {
    (time / 3600.0).floor().rem_euclid(24.0)
}

/// Engineered feature vector in canonical column order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look a column up by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i).copied())
    }
}

/// Feature extractor that transforms transactions into model input features.
///
/// Stateless; a single instance is shared by every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Engineer the full feature vector for a transaction.
    pub fn extract(&self, tx: &Transaction) -> Result<FeatureVector, ScoringError> {
        let frame = self.engineer(tx);
        let features = assemble(&frame)?;

        if let Some(index) = features.values.iter().position(|v| !v.is_finite()) {
            return Err(ScoringError::NonFinite {
                stage: "feature engineering",
                index,
                column: FEATURE_NAMES[index].clone(),
            });
        }

        Ok(features)
    }

    /// Compute every named column, base and derived.
    fn engineer(&self, tx: &Transaction) -> HashMap<String, f64> {
        let v = tx.v_values();
        let mut frame = HashMap::with_capacity(FEATURE_COUNT + 2);

        frame.insert("Time".to_string(), tx.time);
        frame.insert("Amount".to_string(), tx.amount);
        for (i, &value) in v.iter().enumerate() {
            frame.insert(format!("V{}", i + 1), value);
        }

        // Cyclical hour encoding
        let hour = hour_of_day(tx.time);
        frame.insert("Hour".to_string(), hour);
        frame.insert("Hour_sin".to_string(), (2.0 * PI * hour / 24.0).sin());
        frame.insert("Hour_cos".to_string(), (2.0 * PI * hour / 24.0).cos());

        frame.insert("Amount_log".to_string(), tx.amount.ln_1p());

        for (a, b) in interaction_pairs() {
            frame.insert(interaction_name(a, b), v[a - 1] * v[b - 1]);
        }

        // Row-wise aggregates over V1..V28
        frame.insert("V_std".to_string(), sample_std(&v));
        frame.insert(
            "V_max".to_string(),
            v.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        );

        frame
    }

    pub fn feature_count(&self) -> usize {
        FEATURE_COUNT
    }

    /// Column names in the order the models expect.
    pub fn feature_names(&self) -> &'static [String] {
        &FEATURE_NAMES
    }
}

/// Select columns in canonical order; a missing column is fatal.
fn assemble(frame: &HashMap<String, f64>) -> Result<FeatureVector, ScoringError> {
    let values = FEATURE_NAMES
        .iter()
        .map(|name| {
            frame
                .get(name)
                .copied()
                .ok_or_else(|| ScoringError::FeatureOrder {
                    column: name.clone(),
                })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    Ok(FeatureVector { values })
}

/// Sample standard deviation (n - 1 denominator).
fn sample_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}
