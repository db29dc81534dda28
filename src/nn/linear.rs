//! Dense linear layer

use crate::error::{Error, Result};
use crate::nn::module::{Module, refresh_var, var_contiguous};
use crate::nn::var_builder::VarBuilder;
use crate::nn::varmap::Init;
use numr::autograd::{Var, var_add, var_matmul, var_reshape, var_transpose};
use numr::dtype::DType;
use numr::ops::{ScalarOps, TensorOps};
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::{Tensor, TensorId};
use std::collections::HashMap;

/// Dense linear layer: output = input @ weight^T + bias
///
/// Uses `Var<R>` throughout: autograd works during training,
/// near-zero overhead during inference.
pub struct Linear<R: Runtime> {
    weight: Var<R>,
    bias: Option<Var<R>>,
}

impl<R: Runtime> Linear<R> {
    /// Create from loaded tensors. `trainable` controls gradient tracking.
    pub fn new(weight: Tensor<R>, bias: Option<Tensor<R>>, trainable: bool) -> Self {
        Self {
            weight: Var::new(weight, trainable),
            bias: bias.map(|b| Var::new(b, trainable)),
        }
    }

    /// Forward: input @ weight^T + bias
    ///
    /// input: `[..., in_features]`, output: `[..., out_features]`.
    /// Leading dims are folded into rows so the weight is never broadcast
    /// and its gradient comes back as `[out_features, in_features]`.
    pub fn forward<C>(&self, client: &C, input: &Var<R>) -> Result<Var<R>>
    where
        C: RuntimeClient<R> + TensorOps<R> + ScalarOps<R>,
        R::Client: TensorOps<R> + ScalarOps<R>,
    {
        let shape = input.shape().to_vec();
        let in_features = shape.last().copied().unwrap_or(0);
        if shape.is_empty() || in_features != self.in_features() {
            return Err(Error::InvalidArgument {
                arg: "input",
                reason: format!(
                    "expected [..., {}], got {:?}",
                    self.in_features(),
                    shape
                ),
            });
        }

        let rows: usize = shape[..shape.len() - 1].iter().product();
        let flat = if shape.len() == 2 {
            input.clone()
        } else {
            let input = var_contiguous(input, client)?;
            var_reshape(&input, &[rows, in_features]).map_err(Error::Numr)?
        };

        let w_t = var_transpose(&self.weight).map_err(Error::Numr)?;
        let mut output = var_matmul(&flat, &w_t, client).map_err(Error::Numr)?;
        if let Some(bias) = &self.bias {
            output = var_add(&output, bias, client).map_err(Error::Numr)?;
        }

        if shape.len() == 2 {
            return Ok(output);
        }
        let mut out_shape = shape;
        if let Some(last) = out_shape.last_mut() {
            *last = self.out_features();
        }
        var_reshape(&output, &out_shape).map_err(Error::Numr)
    }

    pub fn weight(&self) -> &Var<R> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Var<R>> {
        self.bias.as_ref()
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape()[0]
    }
}

impl<R: Runtime<DType = DType>> Linear<R> {
    /// Load `weight` `[out, in]` and `bias` `[out]` from the builder, falling
    /// back to PyTorch's default uniform initialization when absent.
    pub fn from_builder(
        vb: &mut VarBuilder<'_, R>,
        in_features: usize,
        out_features: usize,
    ) -> Result<Self> {
        let bound = (in_features.max(1) as f32).sqrt().recip();
        let weight = vb.take_or_init("weight", &[out_features, in_features], Init::PyTorchLinear)?;
        let bias = vb.take_or_init("bias", &[out_features], Init::Uniform(bound))?;
        Ok(Self::new(weight, Some(bias), true))
    }
}

impl<R: Runtime> Module<R> for Linear<R> {
    fn parameters(&self) -> Vec<&Var<R>> {
        let mut params = vec![&self.weight];
        if let Some(b) = &self.bias {
            params.push(b);
        }
        params
    }

    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        let mut params = vec![("weight".to_string(), &self.weight)];
        if let Some(b) = &self.bias {
            params.push(("bias".to_string(), b));
        }
        params
    }

    fn load_parameters(&mut self, params: &HashMap<TensorId, Tensor<R>>) {
        refresh_var(&mut self.weight, params);
        if let Some(b) = self.bias.as_mut() {
            refresh_var(b, params);
        }
    }
}
