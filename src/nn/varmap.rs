//! VarMap: named collection of layer weights with seeded initialization.

use crate::error::{Error, Result};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;

/// Initialization strategy for new tensors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    /// All zeros
    Zeros,
    /// All ones
    Ones,
    /// Constant value
    Const(f32),
    /// Uniform random in `[-bound, bound]`
    Uniform(f32),
    /// Kaiming uniform (PyTorch Linear default): U(-1/sqrt(in), 1/sqrt(in)),
    /// where `in` is the last dimension of the shape
    PyTorchLinear,
    /// Normal distribution with zero mean (GPT-2 uses std = 0.02)
    Normal { std: f32 },
}

/// Named collection of layer weights.
///
/// Missing weights are materialized on demand with [`VarMap::get_or_init`],
/// drawing from a seeded RNG so two maps built with the same seed and the
/// same request order hold identical weights.
pub struct VarMap<R: Runtime> {
    data: HashMap<String, Tensor<R>>,
    rng: StdRng,
}

impl<R: Runtime> VarMap<R> {
    /// Empty map seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Empty map with an explicit initialization seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            data: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Insert a tensor, replacing any previous entry with the same name.
    pub fn insert(&mut self, name: String, tensor: Tensor<R>) {
        self.data.insert(name, tensor);
    }

    /// Get a tensor by name.
    pub fn get_tensor(&self, name: &str) -> Result<&Tensor<R>> {
        self.data.get(name).ok_or_else(|| Error::ModelError {
            reason: format!("weight not found: {name}"),
        })
    }

    /// Remove and return a tensor by name.
    pub fn take_tensor(&mut self, name: &str) -> Result<Tensor<R>> {
        self.data.remove(name).ok_or_else(|| Error::ModelError {
            reason: format!("weight not found: {name}"),
        })
    }

    /// All weight names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(|s| s.as_str())
    }

    /// Number of weights.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over all weights.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor<R>)> {
        self.data.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Check if a name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }
}

impl<R: Runtime<DType = DType>> VarMap<R> {
    /// Get a tensor by name, creating it with `init` if absent.
    ///
    /// An existing tensor whose shape differs from `shape` is an error.
    pub fn get_or_init(
        &mut self,
        name: &str,
        shape: &[usize],
        init: Init,
        device: &R::Device,
    ) -> Result<&Tensor<R>> {
        if !self.data.contains_key(name) {
            let tensor = self.init_tensor(shape, init, device)?;
            tracing::trace!(name, ?shape, ?init, "initialized weight");
            self.data.insert(name.to_string(), tensor);
        }
        let t = self.get_tensor(name)?;
        if t.shape() != shape {
            return Err(Error::ModelError {
                reason: format!(
                    "shape mismatch for '{}': expected {:?}, got {:?}",
                    name,
                    shape,
                    t.shape()
                ),
            });
        }
        Ok(t)
    }

    /// Materialize a fresh F32 tensor with the given strategy.
    pub fn init_tensor(
        &mut self,
        shape: &[usize],
        init: Init,
        device: &R::Device,
    ) -> Result<Tensor<R>> {
        let n: usize = shape.iter().product();
        let data: Vec<f32> = match init {
            Init::Zeros => vec![0.0; n],
            Init::Ones => vec![1.0; n],
            Init::Const(c) => vec![c; n],
            Init::Uniform(bound) => self.uniform(n, bound),
            Init::PyTorchLinear => {
                let fan_in = shape.last().copied().unwrap_or(1).max(1);
                self.uniform(n, (fan_in as f32).sqrt().recip())
            }
            Init::Normal { std } => {
                let normal = Normal::new(0.0f32, std).map_err(|e| Error::ModelError {
                    reason: format!("invalid normal init std {std}: {e}"),
                })?;
                (0..n).map(|_| normal.sample(&mut self.rng)).collect()
            }
        };
        Ok(Tensor::<R>::from_slice(&data, shape, device))
    }

    fn uniform(&mut self, n: usize, bound: f32) -> Vec<f32> {
        let bound = bound.abs();
        (0..n)
            .map(|_| self.rng.random_range(-bound..=bound))
            .collect()
    }
}

impl<R: Runtime> Default for VarMap<R> {
    fn default() -> Self {
        Self::new()
    }
}
