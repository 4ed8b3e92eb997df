//! Reconstruction autoencoder used as the anomaly signal.
//!
//! Encoder `[encoder.*]`: linear → norm → mish → linear → norm → mish → linear (latent).
//! Decoder `[decoder.*]` mirrors it back to the input width. Index gaps in
//! the parameter names are the parameterless noise and activation layers.

use crate::error::ScoringError;
use crate::models::layers::{mish_inplace, BatchNorm, Linear};
use crate::models::params::ParamStore;
use crate::models::AnomalyModel;
use anyhow::Result;
use ndarray::{Array1, ArrayView1};

/// Layer widths of the autoencoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoencoderShape {
    pub input_dim: usize,
    pub hidden: usize,
    pub inner: usize,
    pub latent: usize,
}

impl Default for AutoencoderShape {
    fn default() -> Self {
        Self {
            input_dim: 62,
            hidden: 2048,
            inner: 512,
            latent: 128,
        }
    }
}

/// linear → batch norm → mish
#[derive(Debug, Clone)]
struct DenseStage {
    linear: Linear,
    norm: BatchNorm,
}

impl DenseStage {
    fn from_params(
        params: &mut ParamStore,
        linear: &str,
        norm: &str,
        input: usize,
        output: usize,
    ) -> Result<Self> {
        Ok(Self {
            linear: params.linear(linear, input, output)?,
            norm: params.batch_norm(norm, output)?,
        })
    }

    fn forward(&self, x: ArrayView1<f32>) -> Array1<f32> {
        let h = self.linear.forward(x);
        let mut h = self.norm.forward(h.view());
        mish_inplace(&mut h);
        h
    }
}

/// Autoencoder returning a reconstruction of its input.
#[derive(Debug, Clone)]
pub struct Autoencoder {
    name: String,
    shape: AutoencoderShape,
    encoder: [DenseStage; 2],
    latent: Linear,
    decoder: [DenseStage; 2],
    output: Linear,
}

impl Autoencoder {
    pub fn from_params(name: &str, mut params: ParamStore, shape: AutoencoderShape) -> Result<Self> {
        let s = shape;
        let model = Self {
            name: name.to_string(),
            shape,
            encoder: [
                DenseStage::from_params(&mut params, "encoder.1", "encoder.2", s.input_dim, s.hidden)?,
                DenseStage::from_params(&mut params, "encoder.4", "encoder.5", s.hidden, s.inner)?,
            ],
            latent: params.linear("encoder.7", s.inner, s.latent)?,
            decoder: [
                DenseStage::from_params(&mut params, "decoder.0", "decoder.1", s.latent, s.inner)?,
                DenseStage::from_params(&mut params, "decoder.3", "decoder.4", s.inner, s.hidden)?,
            ],
            output: params.linear("decoder.6", s.hidden, s.input_dim)?,
        };
        params.log_unused(name);
        Ok(model)
    }

    pub fn shape(&self) -> AutoencoderShape {
        self.shape
    }

    /// Latent code for an input.
    pub fn encode(&self, x: ArrayView1<f32>) -> Array1<f32> {
        let h = self.encoder[0].forward(x);
        let h = self.encoder[1].forward(h.view());
        self.latent.forward(h.view())
    }

    pub fn decode(&self, z: ArrayView1<f32>) -> Array1<f32> {
        let h = self.decoder[0].forward(z);
        let h = self.decoder[1].forward(h.view());
        self.output.forward(h.view())
    }
}

impl AnomalyModel for Autoencoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_dim(&self) -> usize {
        self.shape.input_dim
    }

    fn reconstruct(&self, input: &[f32]) -> Result<Vec<f32>, ScoringError> {
        if input.len() != self.shape.input_dim {
            return Err(ScoringError::DimensionMismatch {
                stage: "autoencoder",
                expected: self.shape.input_dim,
                actual: input.len(),
            });
        }
        let z = self.encode(ArrayView1::from(input));
        Ok(self.decode(z.view()).to_vec())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::params::tests::{insert_batch_norm, insert_linear};

    pub(crate) const TINY: AutoencoderShape = AutoencoderShape {
        input_dim: 5,
        hidden: 6,
        inner: 4,
        latent: 2,
    };

    pub(crate) fn tiny_params(shape: AutoencoderShape, prefix: &str) -> ParamStore {
        let mut store = ParamStore::new();
        let p = |name: &str| format!("{}{}", prefix, name);

        insert_linear(&mut store, &p("encoder.1"), shape.input_dim, shape.hidden);
        insert_batch_norm(&mut store, &p("encoder.2"), shape.hidden);
        insert_linear(&mut store, &p("encoder.4"), shape.hidden, shape.inner);
        insert_batch_norm(&mut store, &p("encoder.5"), shape.inner);
        insert_linear(&mut store, &p("encoder.7"), shape.inner, shape.latent);
        insert_linear(&mut store, &p("decoder.0"), shape.latent, shape.inner);
        insert_batch_norm(&mut store, &p("decoder.1"), shape.inner);
        insert_linear(&mut store, &p("decoder.3"), shape.inner, shape.hidden);
        insert_batch_norm(&mut store, &p("decoder.4"), shape.hidden);
        insert_linear(&mut store, &p("decoder.6"), shape.hidden, shape.input_dim);
        store
    }

    #[test]
    fn test_reconstruction_shape() {
        let model = Autoencoder::from_params("ae", tiny_params(TINY, ""), TINY).unwrap();
        let input = [0.5, 0.1, -0.3, 0.9, 0.0];

        let z = model.encode(ArrayView1::from(&input[..]));
        assert_eq!(z.len(), TINY.latent);

        let recon = model.reconstruct(&input).unwrap();
        assert_eq!(recon.len(), TINY.input_dim);
        assert!(recon.iter().all(|v| v.is_finite()));
        assert_eq!(recon, model.reconstruct(&input).unwrap());
    }

    #[test]
    fn test_wrong_width_rejected() {
        let params = tiny_params(TINY, "");
        let wider = AutoencoderShape { latent: 3, ..TINY };
        assert!(Autoencoder::from_params("ae", params.clone(), wider).is_err());

        let model = Autoencoder::from_params("ae", params, TINY).unwrap();
        assert!(model.reconstruct(&[0.0; 6]).is_err());
    }

    #[test]
    fn test_default_shape() {
        let shape = AutoencoderShape::default();
        assert_eq!((shape.input_dim, shape.hidden, shape.inner, shape.latent), (62, 2048, 512, 128));
    }
}
