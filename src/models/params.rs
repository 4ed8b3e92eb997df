//! Trained parameter sets and their binding to network layers.
//!
//! Parameter files come out of training as a flat name → tensor mapping,
//! either a PyTorch state dict (`.pt`, `.pth`, `.bin`) or a safetensors file.
//! Data-parallel training leaves a `module.` prefix on every name, so names
//! are canonicalized before they are bound to the architecture.
//!
//! Binding moves tensors out of the store so a loaded network never holds
//! two copies of its weights.

use crate::models::layers::{BatchNorm, Linear};
use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use ndarray::{Array1, Array2};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// A dense `f32` tensor with its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Named parameters of one trained network.
#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    params: HashMap<String, Param>,
}

/// Remove every occurrence of each prefix from a parameter name.
pub fn canonical_name(name: &str, strip_prefixes: &[String]) -> String {
    strip_prefixes
        .iter()
        .filter(|p| !p.is_empty())
        .fold(name.to_string(), |acc, prefix| acc.replace(prefix.as_str(), ""))
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a parameter file, picking the reader from the file extension.
    pub fn from_file<P: AsRef<Path>>(path: P, strip_prefixes: &[String]) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension.as_deref() {
            Some("pt") | Some("pth") | Some("bin") => Self::from_torch(path, strip_prefixes),
            _ => Self::from_safetensors(path, strip_prefixes),
        }
    }

    /// Load a PyTorch state dict saved with `torch.save(model.state_dict(), ..)`.
    pub fn from_torch<P: AsRef<Path>>(path: P, strip_prefixes: &[String]) -> Result<Self> {
        let path = path.as_ref();
        let tensors = candle_core::pickle::read_all(path)
            .with_context(|| format!("Failed to read PyTorch state dict from {}", path.display()))?;
        if tensors.is_empty() {
            bail!("No tensors found in {}, expected a state dict", path.display());
        }
        Self::from_tensors(path, tensors, strip_prefixes)
    }

    /// Load a safetensors parameter file.
    pub fn from_safetensors<P: AsRef<Path>>(path: P, strip_prefixes: &[String]) -> Result<Self> {
        let path = path.as_ref();
        let tensors = candle_core::safetensors::load(path, &Device::Cpu)
            .with_context(|| format!("Failed to read parameters from {}", path.display()))?;
        Self::from_tensors(path, tensors, strip_prefixes)
    }

    fn from_tensors(
        path: &Path,
        tensors: impl IntoIterator<Item = (String, Tensor)>,
        strip_prefixes: &[String],
    ) -> Result<Self> {
        let mut store = Self::new();
        for (raw_name, tensor) in tensors {
            let name = canonical_name(&raw_name, strip_prefixes);
            let shape = tensor.dims().to_vec();
            let data = tensor
                .to_dtype(DType::F32)
                .and_then(|t| t.flatten_all())
                .and_then(|t| t.to_vec1::<f32>())
                .with_context(|| format!("Failed to convert parameter '{}'", raw_name))?;

            if raw_name != name {
                debug!(from = %raw_name, to = %name, "Canonicalized parameter name");
            }
            store.insert(name, shape, data)?;
        }

        info!(
            path = %path.display(),
            tensors = store.len(),
            "Parameter file loaded"
        );

        Ok(store)
    }

    /// Insert a parameter; names must be unique after canonicalization.
    pub fn insert(&mut self, name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Result<()> {
        let name = name.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            bail!(
                "Parameter '{}' has shape {:?} but {} values",
                name,
                shape,
                data.len()
            );
        }
        if self.params.contains_key(&name) {
            bail!("Duplicate parameter '{}' after name canonicalization", name);
        }
        self.params.insert(name, Param { shape, data });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Fetch a parameter, requiring an exact shape.
    pub fn get(&self, name: &str, shape: &[usize]) -> Result<&Param> {
        let param = self
            .params
            .get(name)
            .ok_or_else(|| anyhow!("Missing parameter '{}'", name))?;
        if param.shape != shape {
            bail!(
                "Parameter '{}' has shape {:?}, architecture expects {:?}",
                name,
                param.shape,
                shape
            );
        }
        Ok(param)
    }

    /// Move a parameter out of the store, requiring an exact shape.
    ///
    /// On a shape mismatch the parameter stays in place.
    pub fn take(&mut self, name: &str, shape: &[usize]) -> Result<Param> {
        self.get(name, shape)?;
        self.params
            .remove(name)
            .ok_or_else(|| anyhow!("Missing parameter '{}'", name))
    }

    /// Names left over after binding, e.g. `num_batches_tracked`.
    pub fn remaining(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    /// Log parameters no layer claimed.
    pub fn log_unused(&self, model: &str) {
        let unused: Vec<&str> = self.remaining().collect();
        if !unused.is_empty() {
            debug!(model = %model, unused = ?unused, "Ignoring unbound parameters");
        }
    }

    fn vector(&mut self, name: &str, len: usize) -> Result<Array1<f32>> {
        Ok(Array1::from_vec(self.take(name, &[len])?.data))
    }

    fn matrix(&mut self, name: &str, rows: usize, cols: usize) -> Result<Array2<f32>> {
        let param = self.take(name, &[rows, cols])?;
        Ok(Array2::from_shape_vec((rows, cols), param.data)?)
    }

    /// Bind `{prefix}.weight` `[out, in]` and `{prefix}.bias` `[out]`.
    pub fn linear(&mut self, prefix: &str, in_features: usize, out_features: usize) -> Result<Linear> {
        Linear::new(
            self.matrix(&format!("{}.weight", prefix), out_features, in_features)?,
            self.vector(&format!("{}.bias", prefix), out_features)?,
        )
        .with_context(|| format!("Invalid linear layer '{}'", prefix))
    }

    /// Bind the affine parameters and running statistics of a batch norm.
    pub fn batch_norm(&mut self, prefix: &str, dim: usize) -> Result<BatchNorm> {
        BatchNorm::new(
            self.vector(&format!("{}.weight", prefix), dim)?,
            self.vector(&format!("{}.bias", prefix), dim)?,
            self.vector(&format!("{}.running_mean", prefix), dim)?,
            self.vector(&format!("{}.running_var", prefix), dim)?,
        )
        .with_context(|| format!("Invalid batch norm '{}'", prefix))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Deterministic small-magnitude values for synthetic networks.
    pub(crate) fn pseudo_values(seed: usize, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (((seed * 7919 + i * 104_729) % 1000) as f32 / 1000.0 - 0.5) * 0.2)
            .collect()
    }

    pub(crate) fn insert_linear(store: &mut ParamStore, prefix: &str, input: usize, output: usize) {
        let seed = store.len() + 1;
        store
            .insert(format!("{}.weight", prefix), vec![output, input], pseudo_values(seed, input * output))
            .unwrap();
        store
            .insert(format!("{}.bias", prefix), vec![output], pseudo_values(seed + 1, output))
            .unwrap();
    }

    pub(crate) fn insert_batch_norm(store: &mut ParamStore, prefix: &str, dim: usize) {
        store.insert(format!("{}.weight", prefix), vec![dim], vec![1.0; dim]).unwrap();
        store.insert(format!("{}.bias", prefix), vec![dim], vec![0.0; dim]).unwrap();
        store
            .insert(format!("{}.running_mean", prefix), vec![dim], pseudo_values(store.len(), dim))
            .unwrap();
        store.insert(format!("{}.running_var", prefix), vec![dim], vec![1.0; dim]).unwrap();
    }

    #[test]
    fn test_canonical_name() {
        let prefixes = vec!["module.".to_string()];

        assert_eq!(canonical_name("module.proj.weight", &prefixes), "proj.weight");
        assert_eq!(canonical_name("proj.weight", &prefixes), "proj.weight");
        assert_eq!(
            canonical_name("module.blocks.0.module.fc1.bias", &prefixes),
            "blocks.0.fc1.bias"
        );
        assert_eq!(canonical_name("module.head.bias", &[]), "module.head.bias");
    }

    #[test]
    fn test_insert_validates_shape() {
        let mut store = ParamStore::new();
        assert!(store.insert("w", vec![2, 3], vec![0.0; 5]).is_err());
        assert!(store.insert("w", vec![2, 3], vec![0.0; 6]).is_ok());
        assert!(store.insert("w", vec![6], vec![0.0; 6]).is_err());
    }

    #[test]
    fn test_binding_checks_shapes() {
        let mut store = ParamStore::new();
        insert_linear(&mut store, "fc", 4, 3);

        assert!(store.linear("fc", 3, 4).is_err());
        assert!(store.linear("missing", 4, 3).is_err());
        assert!(store.linear("fc", 4, 3).is_ok());

        insert_batch_norm(&mut store, "bn", 3);
        assert!(store.batch_norm("bn", 4).is_err());
        assert_eq!(store.batch_norm("bn", 3).unwrap().dim(), 3);
    }

    #[test]
    fn test_binding_moves_parameters_out() {
        let mut store = ParamStore::new();
        insert_linear(&mut store, "fc", 2, 2);
        store.insert("bn.num_batches_tracked", vec![], vec![7.0]).unwrap();

        let weight = store.take("fc.weight", &[2, 2]).unwrap();
        assert_eq!(weight.data.len(), 4);
        assert!(!store.contains("fc.weight"));
        assert!(store.take("fc.weight", &[2, 2]).is_err());

        // A wrong shape leaves the parameter in place
        assert!(store.take("fc.bias", &[3]).is_err());
        assert!(store.contains("fc.bias"));
        store.take("fc.bias", &[2]).unwrap();

        assert_eq!(store.remaining().collect::<Vec<_>>(), vec!["bn.num_batches_tracked"]);
    }

    #[test]
    fn test_safetensors_round_trip_strips_prefix() {
        use candle_core::Tensor;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");

        let mut tensors = HashMap::new();
        tensors.insert(
            "module.fc.weight".to_string(),
            Tensor::from_vec(vec![1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "module.fc.bias".to_string(),
            Tensor::from_vec(vec![0.5_f32, -0.5], 2, &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let mut store = ParamStore::from_file(&path, &["module.".to_string()]).unwrap();
        assert!(store.contains("fc.weight"));
        assert!(!store.contains("module.fc.weight"));

        let linear = store.linear("fc", 3, 2).unwrap();
        let out = linear.forward(ndarray::array![1.0_f32, 1.0, 1.0].view());
        assert_eq!(out.to_vec(), vec![6.5, 14.5]);
    }

    /// `tests/fixtures/state_dict.pt` is a zip-format state dict as written by
    /// `torch.save` from a data-parallel model: `module.fc.weight` [2, 3] = 1..6,
    /// `module.fc.bias` = [0.5, -0.5] and an int64 `module.bn.num_batches_tracked`.
    fn state_dict_fixture() -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/state_dict.pt")
    }

    #[test]
    fn test_torch_state_dict_loading() {
        let mut store = ParamStore::from_file(state_dict_fixture(), &["module.".to_string()]).unwrap();

        assert_eq!(store.len(), 3);
        assert!(store.contains("fc.weight"));
        assert!(store.contains("bn.num_batches_tracked"));
        assert!(!store.contains("module.fc.bias"));

        let linear = store.linear("fc", 3, 2).unwrap();
        let out = linear.forward(ndarray::array![1.0_f32, 1.0, 1.0].view());
        assert_eq!(out.to_vec(), vec![6.5, 14.5]);
    }

    #[test]
    fn test_reader_follows_extension() {
        let dir = tempfile::tempdir().unwrap();

        // State dict bytes under a safetensors name are rejected by the safetensors reader
        let misnamed = dir.path().join("weights.safetensors");
        std::fs::copy(state_dict_fixture(), &misnamed).unwrap();
        assert!(ParamStore::from_file(&misnamed, &[]).is_err());

        let garbage = dir.path().join("Classifier.pt");
        std::fs::write(&garbage, b"not a zip archive").unwrap();
        let err = ParamStore::from_file(&garbage, &[]).unwrap_err();
        assert!(format!("{:#}", err).contains("PyTorch state dict"));
    }
}
