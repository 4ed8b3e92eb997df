//! Residual feed-forward fraud classifier.
//!
//! Layout (parameter names in brackets):
//!
//! ```text
//! input ─ proj [proj] ─ 6 × residual block [blocks.{i}] ─ bottleneck ─ head [head] ─ logit
//! block:      norm1 → mish → fc1 → norm2 → mish → fc2 → + input
//! bottleneck: norm [bottleneck.0] → mish → linear [bottleneck.2] → mish
//! ```
//!
//! Input noise and dropout only act during training and are omitted.

use crate::error::ScoringError;
use crate::models::layers::{mish_inplace, BatchNorm, Linear};
use crate::models::params::ParamStore;
use crate::models::FraudClassifier;
use anyhow::{Context, Result};
use ndarray::{Array1, ArrayView1};

/// Layer widths of the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierShape {
    pub input_dim: usize,
    pub width: usize,
    pub blocks: usize,
    pub bottleneck: usize,
}

impl Default for ClassifierShape {
    fn default() -> Self {
        Self {
            input_dim: 62,
            width: 4096,
            blocks: 6,
            bottleneck: 512,
        }
    }
}

#[derive(Debug, Clone)]
struct ResidualBlock {
    norm1: BatchNorm,
    fc1: Linear,
    norm2: BatchNorm,
    fc2: Linear,
}

impl ResidualBlock {
    fn from_params(params: &mut ParamStore, prefix: &str, width: usize) -> Result<Self> {
        Ok(Self {
            norm1: params.batch_norm(&format!("{}.norm1", prefix), width)?,
            fc1: params.linear(&format!("{}.fc1", prefix), width, width)?,
            norm2: params.batch_norm(&format!("{}.norm2", prefix), width)?,
            fc2: params.linear(&format!("{}.fc2", prefix), width, width)?,
        })
    }

    fn forward(&self, x: ArrayView1<f32>) -> Array1<f32> {
        let mut h = self.norm1.forward(x);
        mish_inplace(&mut h);
        let h = self.fc1.forward(h.view());

        let mut h = self.norm2.forward(h.view());
        mish_inplace(&mut h);
        let h = self.fc2.forward(h.view());

        h + &x
    }
}

/// ResNet-style classifier producing a single fraud logit.
#[derive(Debug, Clone)]
pub struct ResNetClassifier {
    name: String,
    shape: ClassifierShape,
    proj: Linear,
    blocks: Vec<ResidualBlock>,
    bottleneck_norm: BatchNorm,
    bottleneck_fc: Linear,
    head: Linear,
}

impl ResNetClassifier {
    /// Bind a trained parameter set to the architecture.
    pub fn from_params(name: &str, mut params: ParamStore, shape: ClassifierShape) -> Result<Self> {
        let blocks = (0..shape.blocks)
            .map(|i| ResidualBlock::from_params(&mut params, &format!("blocks.{}", i), shape.width))
            .collect::<Result<Vec<_>>>()
            .context("Failed to bind residual blocks")?;

        let model = Self {
            name: name.to_string(),
            shape,
            proj: params.linear("proj", shape.input_dim, shape.width)?,
            blocks,
            bottleneck_norm: params.batch_norm("bottleneck.0", shape.width)?,
            bottleneck_fc: params.linear("bottleneck.2", shape.width, shape.bottleneck)?,
            head: params.linear("head", shape.bottleneck, 1)?,
        };
        params.log_unused(name);
        Ok(model)
    }

    pub fn shape(&self) -> ClassifierShape {
        self.shape
    }

    fn forward(&self, x: ArrayView1<f32>) -> f32 {
        let mut h = self.proj.forward(x);
        for block in &self.blocks {
            h = block.forward(h.view());
        }

        let mut h = self.bottleneck_norm.forward(h.view());
        mish_inplace(&mut h);
        let mut h = self.bottleneck_fc.forward(h.view());
        mish_inplace(&mut h);

        self.head.forward(h.view())[0]
    }
}

impl FraudClassifier for ResNetClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_dim(&self) -> usize {
        self.shape.input_dim
    }

    fn logit(&self, input: &[f32]) -> Result<f32, ScoringError> {
        if input.len() != self.shape.input_dim {
            return Err(ScoringError::DimensionMismatch {
                stage: "classifier",
                expected: self.shape.input_dim,
                actual: input.len(),
            });
        }
        Ok(self.forward(ArrayView1::from(input)))
    }
}
