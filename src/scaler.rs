//! Quantile scaling of engineered features.
//!
//! The scaler is fit offline and shipped as a JSON export of the fitted
//! transformer's `quantiles` (n_quantiles x n_features) and `references`
//! (n_quantiles). It is read-only once loaded.
//!
//! Pickled (`.joblib`) transformers are converted with
//! `tools/export_scaler.py`, which also carries `feature_names_in_` over as
//! `feature_names` so the column order can be checked at load time.

use crate::error::ScoringError;
use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;
use statrs::distribution::{ContinuousCDF, Normal};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Margin used to snap values onto the outermost quantiles.
const BOUNDS_THRESHOLD: f64 = 1e-7;

/// A fitted, element-wise feature transform aligned by column position.
pub trait FeatureScaler: Send + Sync {
    fn n_features(&self) -> usize;

    fn transform(&self, features: &[f64]) -> Result<Vec<f64>, ScoringError>;
}

/// Target distribution of the quantile transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputDistribution {
    #[default]
    Uniform,
    Normal,
}

#[derive(Debug, Deserialize)]
struct QuantileScalerFile {
    #[serde(default)]
    output_distribution: OutputDistribution,
    references: Vec<f64>,
    quantiles: Vec<Vec<f64>>,
    #[serde(default)]
    feature_names: Option<Vec<String>>,
}

/// Per-column quantile transformer.
#[derive(Debug, Clone)]
pub struct QuantileScaler {
    output_distribution: OutputDistribution,
    references: Vec<f64>,
    /// Column-major: `columns[j]` holds the quantiles of feature `j`
    columns: Vec<Vec<f64>>,
    feature_names: Option<Vec<String>>,
}

impl QuantileScaler {
    /// Build a scaler from row-major quantiles (one row per reference point).
    pub fn new(
        output_distribution: OutputDistribution,
        references: Vec<f64>,
        quantiles: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if references.len() < 2 {
            bail!("Quantile scaler needs at least 2 references, got {}", references.len());
        }
        if quantiles.len() != references.len() {
            bail!(
                "Quantile rows ({}) do not match references ({})",
                quantiles.len(),
                references.len()
            );
        }

        let n_features = quantiles[0].len();
        if n_features == 0 {
            bail!("Quantile scaler has no feature columns");
        }
        if let Some(row) = quantiles.iter().position(|r| r.len() != n_features) {
            bail!("Quantile row {} has {} columns, expected {}", row, quantiles[row].len(), n_features);
        }
        if references.iter().chain(quantiles.iter().flatten()).any(|v| !v.is_finite()) {
            bail!("Quantile scaler contains non-finite values");
        }

        let columns = (0..n_features)
            .map(|j| quantiles.iter().map(|row| row[j]).collect())
            .collect();

        Ok(Self {
            output_distribution,
            references,
            columns,
            feature_names: None,
        })
    }

    /// Load a scaler export from disk.
    ///
    /// Expects the JSON written by `tools/export_scaler.py`; the joblib pickle
    /// itself is not readable here.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scaler from {}", path.display()))?;
        let file: QuantileScalerFile = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse scaler {}", path.display()))?;

        let mut scaler = Self::new(file.output_distribution, file.references, file.quantiles)?;
        if let Some(names) = file.feature_names {
            if names.len() != scaler.n_features() {
                bail!(
                    "Scaler lists {} feature names for {} columns",
                    names.len(),
                    scaler.n_features()
                );
            }
            scaler.feature_names = Some(names);
        }

        info!(
            path = %path.display(),
            features = scaler.n_features(),
            quantiles = scaler.references.len(),
            distribution = ?scaler.output_distribution,
            "Quantile scaler loaded"
        );

        Ok(scaler)
    }

    /// Reject the scaler if it was fit on a different column order.
    pub fn check_alignment(&self, expected: &[String]) -> Result<()> {
        if self.n_features() != expected.len() {
            bail!(
                "Scaler fit on {} features, pipeline produces {}",
                self.n_features(),
                expected.len()
            );
        }
        if let Some(names) = &self.feature_names {
            if let Some((i, (got, want))) = names
                .iter()
                .zip(expected)
                .enumerate()
                .find(|(_, (got, want))| got != want)
            {
                bail!("Scaler column {} is '{}', pipeline expects '{}'", i, got, want);
            }
        }
        Ok(())
    }

    pub fn output_distribution(&self) -> OutputDistribution {
        self.output_distribution
    }

    fn transform_value(&self, column: usize, x: f64) -> f64 {
        let quantiles = &self.columns[column];
        let references = &self.references;
        let lower_x = quantiles[0];
        let upper_x = quantiles[quantiles.len() - 1];

        let (at_lower, at_upper) = match self.output_distribution {
            OutputDistribution::Uniform => (x == lower_x, x == upper_x),
            OutputDistribution::Normal => {
                (x - BOUNDS_THRESHOLD < lower_x, x + BOUNDS_THRESHOLD > upper_x)
            }
        };

        let mut y = if x.is_nan() {
            x
        } else {
            // Average of ascending and descending interpolation handles
            // repeated quantiles symmetrically.
            let forward = interp(x, quantiles, references);
            let backward = interp_reversed(-x, quantiles, references);
            0.5 * (forward - backward)
        };
        if at_upper {
            y = 1.0;
        }
        if at_lower {
            y = 0.0;
        }

        match self.output_distribution {
            OutputDistribution::Uniform => y,
            OutputDistribution::Normal if y.is_nan() => y,
            OutputDistribution::Normal => {
                let (clip_min, clip_max) = normal_clip_bounds();
                STANDARD_NORMAL
                    .inverse_cdf(y.clamp(0.0, 1.0))
                    .clamp(clip_min, clip_max)
            }
        }
    }
}

impl FeatureScaler for QuantileScaler {
    fn n_features(&self) -> usize {
        self.columns.len()
    }

    fn transform(&self, features: &[f64]) -> Result<Vec<f64>, ScoringError> {
        if features.len() != self.n_features() {
            return Err(ScoringError::DimensionMismatch {
                stage: "quantile scaler",
                expected: self.n_features(),
                actual: features.len(),
            });
        }

        Ok(features
            .iter()
            .enumerate()
            .map(|(j, &x)| self.transform_value(j, x))
            .collect())
    }
}

static STANDARD_NORMAL: Lazy<Normal> =
    Lazy::new(|| Normal::new(0.0, 1.0).expect("unit normal parameters are valid"));

static NORMAL_CLIP: Lazy<(f64, f64)> = Lazy::new(|| {
    let margin = BOUNDS_THRESHOLD - f64::EPSILON;
    (
        STANDARD_NORMAL.inverse_cdf(margin),
        STANDARD_NORMAL.inverse_cdf(1.0 - margin),
    )
});

fn normal_clip_bounds() -> (f64, f64) {
    *NORMAL_CLIP
}

/// One-dimensional piecewise-linear interpolation with clamped ends.
///
/// `xp` must be non-decreasing.
fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    interp_by(x, xp.len(), |i| xp[i], |i| fp[i])
}

/// `interp` over the negated, reversed knots, read in place.
fn interp_reversed(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let last = xp.len() - 1;
    interp_by(x, xp.len(), |i| -xp[last - i], |i| -fp[last - i])
}

fn interp_by(x: f64, len: usize, xp: impl Fn(usize) -> f64, fp: impl Fn(usize) -> f64) -> f64 {
    let last = len - 1;

    if x < xp(0) {
        return fp(0);
    }
    if x >= xp(last) {
        return fp(last);
    }

    // Largest j with xp(j) <= x; j < last because x < xp(last)
    let (mut lo, mut hi) = (0, len);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if xp(mid) <= x {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    let j = lo - 1;
    let slope = (fp(j + 1) - fp(j)) / (xp(j + 1) - xp(j));
    slope * (x - xp(j)) + fp(j)
}

/// Wraps the optional scaler; passes features through unscaled when absent.
///
/// Unscaled output is never scored: the inference engine gates on
/// [`Preprocessor::is_loaded`].
#[derive(Clone, Default)]
pub struct Preprocessor {
    scaler: Option<Arc<dyn FeatureScaler>>,
}

impl Preprocessor {
    pub fn new(scaler: Option<Arc<dyn FeatureScaler>>) -> Self {
        if scaler.is_none() {
            warn!("Scaler not loaded, features will pass through unscaled");
        }
        Self { scaler }
    }

    pub fn is_loaded(&self) -> bool {
        self.scaler.is_some()
    }

    pub fn transform(&self, features: &[f64]) -> Result<Vec<f64>, ScoringError> {
        let scaled = match &self.scaler {
            Some(scaler) => scaler.transform(features)?,
            None => features.to_vec(),
        };

        if let Some(index) = scaled.iter().position(|v| !v.is_finite()) {
            return Err(ScoringError::NonFinite {
                stage: "quantile scaler",
                index,
                column: format!("column {}", index),
            });
        }

        Ok(scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn uniform_scaler() -> QuantileScaler {
        // Two features; second has a repeated quantile
        QuantileScaler::new(
            OutputDistribution::Uniform,
            vec![0.0, 0.5, 1.0],
            vec![vec![0.0, -1.0], vec![10.0, 1.0], vec![20.0, 1.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_interp() {
        let xp = [0.0, 1.0, 3.0];
        let fp = [0.0, 10.0, 30.0];
        let run = |x| interp(x, &xp, &fp);

        assert_eq!(run(-1.0), 0.0);
        assert_eq!(run(0.5), 5.0);
        assert_eq!(run(2.0), 20.0);
        assert_eq!(run(3.0), 30.0);
        assert_eq!(run(9.0), 30.0);
    }

    #[test]
    fn test_interp_reversed_matches_negated_copy() {
        // Repeated knots make the two directions disagree
        let xp = [-1.0, 1.0, 1.0, 1.0, 4.0];
        let fp = [0.0, 0.25, 0.5, 0.75, 1.0];
        let neg_xp: Vec<f64> = xp.iter().rev().map(|v| -v).collect();
        let neg_fp: Vec<f64> = fp.iter().rev().map(|v| -v).collect();

        for x in [-2.0, -1.0, 0.0, 0.5, 1.0, 2.5, 4.0, 7.0] {
            let expected = interp(-x, &neg_xp, &neg_fp);
            assert_eq!(interp_reversed(-x, &xp, &fp).to_bits(), expected.to_bits());
        }
        assert_eq!(interp(1.0, &xp, &fp), 0.75);
        assert_eq!(-interp_reversed(-1.0, &xp, &fp), 0.25);
    }

    #[test]
    fn test_uniform_transform() {
        let scaler = uniform_scaler();

        let out = scaler.transform(&[5.0, 0.0]).unwrap();
        assert!((out[0] - 0.25).abs() < 1e-12);
        assert!((out[1] - 0.25).abs() < 1e-12);

        // Clamped outside the fitted range, snapped on the bounds
        assert_eq!(scaler.transform(&[-100.0, 50.0]).unwrap(), vec![0.0, 1.0]);
        assert_eq!(scaler.transform(&[0.0, -1.0]).unwrap(), vec![0.0, 0.0]);
        assert_eq!(scaler.transform(&[20.0, 1.0]).unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_transform_is_monotonic() {
        let scaler = uniform_scaler();
        let mut previous = f64::NEG_INFINITY;
        for step in 0..=40 {
            let x = step as f64 * 0.5;
            let y = scaler.transform(&[x, 0.0]).unwrap()[0];
            assert!(y >= previous);
            previous = y;
        }
    }

    #[test]
    fn test_normal_transform() {
        let scaler = QuantileScaler::new(
            OutputDistribution::Normal,
            vec![0.0, 0.5, 1.0],
            vec![vec![0.0], vec![10.0], vec![20.0]],
        )
        .unwrap();
        let (clip_min, clip_max) = normal_clip_bounds();

        assert!(scaler.transform(&[10.0]).unwrap()[0].abs() < 1e-9);
        assert_eq!(scaler.transform(&[0.0]).unwrap()[0], clip_min);
        assert_eq!(scaler.transform(&[25.0]).unwrap()[0], clip_max);
        assert!(clip_min < -5.0 && clip_max > 5.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = uniform_scaler().transform(&[1.0]).unwrap_err();
        assert_eq!(
            err,
            ScoringError::DimensionMismatch {
                stage: "quantile scaler",
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_invalid_shapes_rejected() {
        assert!(QuantileScaler::new(OutputDistribution::Uniform, vec![0.0], vec![vec![1.0]]).is_err());
        assert!(QuantileScaler::new(
            OutputDistribution::Uniform,
            vec![0.0, 1.0],
            vec![vec![1.0, 2.0], vec![3.0]]
        )
        .is_err());
    }

    #[test]
    fn test_from_file_and_alignment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"output_distribution": "uniform", "references": [0.0, 1.0],
                "quantiles": [[0.0, 0.0], [1.0, 2.0]], "feature_names": ["a", "b"]}}"#
        )
        .unwrap();

        let scaler = QuantileScaler::from_file(file.path()).unwrap();
        assert_eq!(scaler.n_features(), 2);
        assert!(scaler.check_alignment(&["a".to_string(), "b".to_string()]).is_ok());
        assert!(scaler.check_alignment(&["b".to_string(), "a".to_string()]).is_err());
        assert!(scaler.check_alignment(&["a".to_string()]).is_err());
    }

    #[test]
    fn test_exported_transformer_without_names() {
        // json.dump output of a normal-output transformer fit on an unnamed array
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"output_distribution": "normal", "references": [0.0, 0.5, 1.0], "quantiles": [[-3.2, 1e-07], [0.0, 0.5], [4.75, 1.0]]}}"#
        )
        .unwrap();

        let scaler = QuantileScaler::from_file(file.path()).unwrap();
        assert_eq!(scaler.n_features(), 2);
        assert_eq!(scaler.output_distribution(), OutputDistribution::Normal);
        // Unnamed exports cannot be checked, only counted
        assert!(scaler.check_alignment(&["x".to_string(), "y".to_string()]).is_ok());

        let out = scaler.transform(&[0.0, 0.5]).unwrap();
        assert!(out.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_preprocessor_passthrough() {
        let preprocessor = Preprocessor::new(None);
        assert!(!preprocessor.is_loaded());
        assert_eq!(preprocessor.transform(&[1.5, -2.0]).unwrap(), vec![1.5, -2.0]);

        let err = preprocessor.transform(&[f64::NAN]).unwrap_err();
        assert!(matches!(err, ScoringError::NonFinite { index: 0, .. }));
    }
}
