//! Dropout regularization layer
//!
//! During training, randomly zeroes elements with probability `p` and scales
//! survivors by `1/(1-p)` (inverted dropout). During evaluation, acts as identity.

use crate::error::{Error, Result};
use crate::nn::module::TrainMode;
use numr::autograd::{Var, var_dropout};
use numr::ops::{BinaryOps, RandomOps, ScalarOps, TensorOps};
use numr::runtime::{Runtime, RuntimeClient};

/// Dropout layer with training/eval mode.
///
/// Applies inverted dropout during training: each element is zeroed with
/// probability `p` and surviving elements are scaled by `1/(1-p)` so the
/// expected value is preserved.
///
/// During evaluation (after `set_training(false)`), dropout is disabled and
/// the input passes through unchanged.
#[derive(Debug, Clone)]
pub struct Dropout {
    p: f64,
    training: bool,
}

impl Dropout {
    /// Create a new dropout layer with drop probability `p`.
    ///
    /// Starts in training mode.
    pub fn new(p: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&p) {
            return Err(Error::config(format!(
                "dropout probability must be in [0, 1], got {p}"
            )));
        }
        Ok(Self { p, training: true })
    }

    /// Returns the dropout probability.
    pub fn p(&self) -> f64 {
        self.p
    }

    /// Whether `forward` currently changes its input.
    pub fn is_active(&self) -> bool {
        self.training && self.p > 0.0
    }

    /// Forward pass.
    ///
    /// In training mode: applies dropout with probability `p`.
    /// In eval mode: returns input unchanged.
    pub fn forward<R, C>(&self, client: &C, input: &Var<R>) -> Result<Var<R>>
    where
        R: Runtime<DType = numr::dtype::DType>,
        C: RuntimeClient<R> + TensorOps<R> + RandomOps<R> + ScalarOps<R> + BinaryOps<R>,
        R::Client: TensorOps<R> + ScalarOps<R> + BinaryOps<R>,
    {
        if !self.is_active() {
            return Ok(input.clone());
        }
        let (output, _mask) = var_dropout(input, self.p, client).map_err(Error::Numr)?;
        Ok(output)
    }
}

impl TrainMode for Dropout {
    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
