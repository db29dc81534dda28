//! Neural network module traits for parameter access and train/eval switching.

use crate::error::{Error, Result};
use numr::autograd::{Var, var_mul_scalar};
use numr::ops::ScalarOps;
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::{Tensor, TensorId};
use std::collections::HashMap;

/// Core trait for neural network modules.
///
/// Provides access to trainable parameters for optimizers and
/// named parameters for inspection and weight export.
///
/// Forward passes stay as inherent methods on each layer because
/// signatures differ (different client bounds, input types).
pub trait Module<R: Runtime> {
    /// All trainable parameters (for optimizer).
    fn parameters(&self) -> Vec<&Var<R>>;

    /// Named parameters. Names use dot notation for nested modules:
    /// `"self_attention.query.weight"`.
    fn named_parameters(&self) -> Vec<(String, &Var<R>)>;

    /// Write updated parameter values back into the module.
    ///
    /// `params` is keyed by the parameter's `TensorId`, the same key the
    /// optimizer uses. Parameters missing from the map keep their value.
    fn load_parameters(&mut self, params: &HashMap<TensorId, Tensor<R>>);

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|v| v.tensor().numel()).sum()
    }

    /// Snapshot of all parameters keyed by identity, ready for `Optimizer::step`.
    fn parameter_map(&self) -> HashMap<TensorId, Tensor<R>> {
        self.parameters()
            .into_iter()
            .map(|v| (v.id(), v.tensor().clone()))
            .collect()
    }
}

/// Training / evaluation mode switch (dropout is active only in training).
pub trait TrainMode {
    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;
}

/// Replace `var`'s tensor with the entry for its id, keeping the id stable.
pub(crate) fn refresh_var<R: Runtime>(var: &mut Var<R>, params: &HashMap<TensorId, Tensor<R>>) {
    if let Some(t) = params.get(&var.id()) {
        *var = Var::with_id(t.clone(), var.id(), var.requires_grad());
    }
}

/// Materialize a strided view while staying on the autograd tape.
///
/// A plain `tensor().contiguous()` would cut the graph, so the copy goes
/// through an identity scale instead.
pub(crate) fn var_contiguous<R, C>(v: &Var<R>, client: &C) -> Result<Var<R>>
where
    R: Runtime,
    C: RuntimeClient<R> + ScalarOps<R>,
    R::Client: ScalarOps<R>,
{
    if v.tensor().is_contiguous() {
        return Ok(v.clone());
    }
    var_copy(v, client)
}

/// Identity op that always copies, forward and backward.
///
/// numr's reshape backward needs a contiguous incoming gradient. Placing this
/// between a reshape and a later permute makes the permuted (strided)
/// gradient contiguous before it reaches the reshape.
pub(crate) fn var_copy<R, C>(v: &Var<R>, client: &C) -> Result<Var<R>>
where
    R: Runtime,
    C: RuntimeClient<R> + ScalarOps<R>,
    R::Client: ScalarOps<R>,
{
    var_mul_scalar(v, 1.0, client).map_err(Error::Numr)
}

/// Prefix every name of a nested module's `named_parameters`.
pub(crate) fn prefixed<'a, R: Runtime>(
    prefix: &str,
    named: Vec<(String, &'a Var<R>)>,
) -> Vec<(String, &'a Var<R>)> {
    named
        .into_iter()
        .map(|(name, var)| (format!("{prefix}.{name}"), var))
        .collect()
}
