//! Activation function enum for configurable feed-forward layers

use crate::error::{Error, Result};
use numr::autograd::{Var, var_add, var_mul, var_mul_scalar, var_sigmoid, var_silu};
use numr::dtype::DType;
use numr::ops::{ActivationOps, BinaryOps, ScalarOps, TensorOps, UnaryOps};
use numr::runtime::{Runtime, RuntimeClient};

/// `2 * sqrt(2 / pi)`: tanh(z) = 2 * sigmoid(2z) - 1 folds the usual
/// `sqrt(2 / pi)` factor of the tanh GELU into a single sigmoid argument.
const GELU_SIGMOID_SCALE: f64 = 1.595_769_121_605_730_7;
const GELU_CUBIC_COEFF: f64 = 0.044_715;

/// Activation function selector for layer configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// GELU, tanh approximation. Differs from the exact erf form
    /// `0.5 * x * (1 + erf(x / sqrt(2)))` by up to about 1e-3.
    #[default]
    Gelu,
    Silu,
}

impl Activation {
    /// Apply this activation to a `Var`, keeping the autograd graph.
    pub fn forward<R, C>(&self, client: &C, x: &Var<R>) -> Result<Var<R>>
    where
        R: Runtime<DType = DType>,
        C: RuntimeClient<R> + TensorOps<R> + ScalarOps<R> + ActivationOps<R> + UnaryOps<R>,
        R::Client: TensorOps<R> + ScalarOps<R> + ActivationOps<R> + UnaryOps<R> + BinaryOps<R>,
    {
        match self {
            Activation::Gelu => var_gelu(x, client),
            Activation::Silu => var_silu(x, client).map_err(Error::Numr),
        }
    }
}

/// GELU (tanh approximation) with autograd support:
///
/// ```text
/// gelu(x) = 0.5 * x * (1 + tanh(sqrt(2/pi) * (x + 0.044715 * x^3)))
///         = x * sigmoid(2 * sqrt(2/pi) * (x + 0.044715 * x^3))
/// ```
pub fn var_gelu<R, C>(x: &Var<R>, client: &C) -> Result<Var<R>>
where
    R: Runtime<DType = DType>,
    C: RuntimeClient<R> + TensorOps<R> + ScalarOps<R> + ActivationOps<R> + UnaryOps<R>,
    R::Client: TensorOps<R> + ScalarOps<R> + ActivationOps<R> + UnaryOps<R> + BinaryOps<R>,
{
    let x2 = var_mul(x, x, client).map_err(Error::Numr)?;
    let x3 = var_mul(&x2, x, client).map_err(Error::Numr)?;
    let cubic = var_mul_scalar(&x3, GELU_CUBIC_COEFF, client).map_err(Error::Numr)?;
    let inner = var_add(x, &cubic, client).map_err(Error::Numr)?;
    let inner = var_mul_scalar(&inner, GELU_SIGMOID_SCALE, client).map_err(Error::Numr)?;
    let gate = var_sigmoid(&inner, client).map_err(Error::Numr)?;
    var_mul(x, &gate, client).map_err(Error::Numr)
}

impl std::fmt::Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Activation::Gelu => write!(f, "gelu"),
            Activation::Silu => write!(f, "silu"),
        }
    }
}
