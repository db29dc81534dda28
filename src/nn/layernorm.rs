//! Layer Normalization module
//!
//! LayerNorm: output = (x - mean) / sqrt(var + eps) * weight + bias
//! Composed from numr autograd primitives for training support.

use crate::error::{Error, Result};
use crate::nn::module::{Module, refresh_var};
use crate::nn::var_builder::VarBuilder;
use crate::nn::varmap::Init;
use numr::autograd::{Var, var_add, var_add_scalar, var_mean, var_mul, var_sqrt, var_sub};
use numr::dtype::DType;
use numr::ops::{ReduceOps, ScalarOps, TensorOps};
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::{Tensor, TensorId};
use std::collections::HashMap;

/// Layer Normalization over the last dimension.
///
/// weight (gamma): `[hidden_size]`
/// bias (beta): `[hidden_size]`
pub struct LayerNorm<R: Runtime> {
    weight: Var<R>,
    bias: Var<R>,
    eps: f64,
}

impl<R: Runtime> LayerNorm<R> {
    pub fn new(weight: Tensor<R>, bias: Tensor<R>, eps: f64, trainable: bool) -> Self {
        Self {
            weight: Var::new(weight, trainable),
            bias: Var::new(bias, trainable),
            eps,
        }
    }

    /// Forward: (x - mean) / sqrt(var + eps) * weight + bias
    ///
    /// Variance is the biased (population) estimate, as in PyTorch.
    /// input: `[..., hidden_size]`, output: same shape
    pub fn forward<C>(&self, client: &C, input: &Var<R>) -> Result<Var<R>>
    where
        R: Runtime<DType = DType>,
        C: RuntimeClient<R> + TensorOps<R> + ScalarOps<R> + ReduceOps<R>,
        R::Client: TensorOps<R> + ScalarOps<R> + ReduceOps<R>,
    {
        let ndim = input.shape().len();
        if ndim == 0 {
            return Err(Error::InvalidArgument {
                arg: "input",
                reason: "layer norm needs at least one dimension".into(),
            });
        }
        let last_dim = ndim - 1;

        let mean = var_mean(input, &[last_dim], true, client).map_err(Error::Numr)?;
        let centered = var_sub(input, &mean, client).map_err(Error::Numr)?;

        // variance = mean((x - mean)^2)
        let sq = var_mul(&centered, &centered, client).map_err(Error::Numr)?;
        let variance = var_mean(&sq, &[last_dim], true, client).map_err(Error::Numr)?;

        let var_eps = var_add_scalar(&variance, self.eps, client).map_err(Error::Numr)?;
        let std = var_sqrt(&var_eps, client).map_err(Error::Numr)?;
        let normed = numr::autograd::var_div(&centered, &std, client).map_err(Error::Numr)?;

        let scaled = var_mul(&normed, &self.weight, client).map_err(Error::Numr)?;
        var_add(&scaled, &self.bias, client).map_err(Error::Numr)
    }

    pub fn weight(&self) -> &Var<R> {
        &self.weight
    }

    pub fn bias(&self) -> &Var<R> {
        &self.bias
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }
}

impl<R: Runtime<DType = DType>> LayerNorm<R> {
    /// Load `weight`/`bias` `[hidden_size]`, defaulting to ones/zeros.
    pub fn from_builder(vb: &mut VarBuilder<'_, R>, hidden_size: usize, eps: f64) -> Result<Self> {
        let weight = vb.take_or_init("weight", &[hidden_size], Init::Ones)?;
        let bias = vb.take_or_init("bias", &[hidden_size], Init::Zeros)?;
        Ok(Self::new(weight, bias, eps, true))
    }
}

impl<R: Runtime> Module<R> for LayerNorm<R> {
    fn parameters(&self) -> Vec<&Var<R>> {
        vec![&self.weight, &self.bias]
    }

    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        vec![
            ("weight".to_string(), &self.weight),
            ("bias".to_string(), &self.bias),
        ]
    }

    fn load_parameters(&mut self, params: &HashMap<TensorId, Tensor<R>>) {
        refresh_var(&mut self.weight, params);
        refresh_var(&mut self.bias, params);
    }
}
