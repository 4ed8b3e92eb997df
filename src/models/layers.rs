//! Inference-mode building blocks for the scoring networks.
//!
//! All layers operate on a single sample (batch of one) in `f32`, matching
//! the precision the networks were trained in. Normalization always uses
//! the running statistics captured at training time, so one request can
//! never influence another.

use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView1};

/// Epsilon used by the trained batch-normalization layers.
pub const BATCH_NORM_EPS: f32 = 1e-5;

/// Above this input, softplus is treated as the identity.
const SOFTPLUS_THRESHOLD: f32 = 20.0;

/// Fully connected layer: `y = W x + b`, with `W` stored `[out, in]`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weight.nrows() != bias.len() {
            bail!(
                "Linear weight has {} rows but bias has {} entries",
                weight.nrows(),
                bias.len()
            );
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, x: ArrayView1<f32>) -> Array1<f32> {
        self.weight.dot(&x) + &self.bias
    }
}

/// Batch normalization in evaluation mode.
///
/// The affine parameters and running statistics are folded into a single
/// per-channel scale and shift at load time.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    scale: Array1<f32>,
    shift: Array1<f32>,
}

impl BatchNorm {
    pub fn new(
        weight: Array1<f32>,
        bias: Array1<f32>,
        running_mean: Array1<f32>,
        running_var: Array1<f32>,
    ) -> Result<Self> {
        let dim = weight.len();
        if bias.len() != dim || running_mean.len() != dim || running_var.len() != dim {
            bail!("BatchNorm parameters disagree on channel count {}", dim);
        }
        if running_var.iter().any(|&v| v < 0.0 || !v.is_finite()) {
            bail!("BatchNorm running variance must be finite and non-negative");
        }

        let scale = &weight / &running_var.mapv(|v| (v + BATCH_NORM_EPS).sqrt());
        let shift = &bias - &(&running_mean * &scale);
        Ok(Self { scale, shift })
    }

    pub fn dim(&self) -> usize {
        self.scale.len()
    }

    pub fn forward(&self, x: ArrayView1<f32>) -> Array1<f32> {
        &x * &self.scale + &self.shift
    }
}

/// `ln(1 + e^x)`, linear above the threshold.
pub fn softplus(x: f32) -> f32 {
    if x > SOFTPLUS_THRESHOLD {
        x
    } else {
        x.exp().ln_1p()
    }
}

/// Mish activation: `x * tanh(softplus(x))`.
pub fn mish(x: f32) -> f32 {
    x * softplus(x).tanh()
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Apply Mish element-wise in place.
pub fn mish_inplace(x: &mut Array1<f32>) {
    x.mapv_inplace(mish);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_linear_forward() {
        let linear = Linear::new(array![[1.0, 2.0], [0.0, -1.0], [0.5, 0.5]], array![0.0, 1.0, -1.0])
            .unwrap();
        let out = linear.forward(array![3.0, 4.0].view());

        assert_eq!(linear.in_features(), 2);
        assert_eq!(linear.out_features(), 3);
        assert_eq!(out, array![11.0_f32, -3.0, 2.5]);
    }

    #[test]
    fn test_linear_shape_check() {
        assert!(Linear::new(array![[1.0, 2.0]], array![0.0, 1.0]).is_err());
    }

    #[test]
    fn test_batch_norm_uses_running_stats() {
        let norm = BatchNorm::new(
            array![2.0, 1.0],
            array![0.5, 0.0],
            array![1.0, -1.0],
            array![4.0, 1.0],
        )
        .unwrap();
        let out = norm.forward(array![3.0, -1.0].view());

        // (3 - 1) / sqrt(4 + eps) * 2 + 0.5 ≈ 2.5
        assert!((out[0] - 2.5).abs() < 1e-4);
        assert!(out[1].abs() < 1e-6);
    }

    #[test]
    fn test_activations() {
        assert_eq!(mish(0.0), 0.0);
        assert!((mish(1.0) - 0.865_098_4).abs() < 1e-6);
        assert!((mish(-1.0) + 0.303_401_3).abs() < 1e-6);
        assert_eq!(softplus(30.0), 30.0);
        assert!((softplus(0.0) - std::f32::consts::LN_2).abs() < 1e-7);

        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(20.0) > 0.999_999);
        assert!(sigmoid(-20.0) < 1e-6);
    }
}
