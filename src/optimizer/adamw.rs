//! AdamW optimizer
//!
//! Adam with decoupled weight decay (Loshchilov & Hutter, 2019). Every
//! parameter keeps its own step count, so parameters that first receive a
//! gradient late still get full bias correction on their first update.
//! The decay term is applied to the parameter after the moment-based update.
//!
//! Composed from numr client ops, so it runs on any backend.

use crate::error::{Error, Result};
use crate::optimizer::gradient::{Gradient, Gradients};
use crate::optimizer::param_group::{ParamGroup, ResolvedParamGroup, resolve_groups};
use crate::optimizer::traits::Optimizer;
use numr::dtype::DType;
use numr::ops::{BinaryOps, ScalarOps, UnaryOps};
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::{Tensor, TensorId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// AdamW configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamWConfig {
    pub lr: f64,
    /// Decay rates of the first and second moment averages
    pub betas: (f64, f64),
    pub eps: f64,
    pub weight_decay: f64,
    /// Divide the moments by `1 - beta^t` before use
    pub correct_bias: bool,
}

impl Default for AdamWConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            betas: (0.9, 0.999),
            eps: 1e-6,
            weight_decay: 0.0,
            correct_bias: true,
        }
    }
}

impl AdamWConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lr.is_nan() || self.lr < 0.0 {
            return Err(Error::config(format!(
                "invalid learning rate: {} - should be >= 0.0",
                self.lr
            )));
        }
        let (beta1, beta2) = self.betas;
        if !(0.0..1.0).contains(&beta1) {
            return Err(Error::config(format!(
                "invalid beta parameter: {beta1} - should be in [0.0, 1.0)"
            )));
        }
        if !(0.0..1.0).contains(&beta2) {
            return Err(Error::config(format!(
                "invalid beta parameter: {beta2} - should be in [0.0, 1.0)"
            )));
        }
        if self.eps.is_nan() || self.eps < 0.0 {
            return Err(Error::config(format!(
                "invalid epsilon value: {} - should be >= 0.0",
                self.eps
            )));
        }
        if self.weight_decay.is_nan() || self.weight_decay < 0.0 {
            return Err(Error::config(format!(
                "invalid weight_decay value: {} - should be >= 0.0",
                self.weight_decay
            )));
        }
        Ok(())
    }

    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.betas = (beta1, beta2);
        self
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_correct_bias(mut self, correct_bias: bool) -> Self {
        self.correct_bias = correct_bias;
        self
    }
}

/// Per-parameter optimizer state, created on the parameter's first update.
pub struct ParamState<R: Runtime> {
    step: u64,
    exp_avg: Tensor<R>,
    exp_avg_sq: Tensor<R>,
}

impl<R: Runtime> ParamState<R> {
    /// Number of updates applied to this parameter.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// First moment (moving average of the gradient).
    pub fn exp_avg(&self) -> &Tensor<R> {
        &self.exp_avg
    }

    /// Second moment (moving average of the squared gradient).
    pub fn exp_avg_sq(&self) -> &Tensor<R> {
        &self.exp_avg_sq
    }
}

/// AdamW optimizer with decoupled weight decay
///
/// State is keyed by parameter identity (`TensorId`) and lazily initialized
/// on the first `step()` that sees a gradient for the parameter.
pub struct AdamW<R: Runtime> {
    defaults: AdamWConfig,
    groups: Vec<ResolvedParamGroup>,
    group_index: HashMap<TensorId, usize>,
    state: HashMap<TensorId, ParamState<R>>,
}

impl<R: Runtime<DType = DType>> AdamW<R> {
    /// Single group: every parameter uses `config`.
    pub fn new(config: AdamWConfig) -> Result<Self> {
        Self::with_param_groups(config, Vec::new())
    }

    /// `groups` override `defaults` for the parameters they list. Parameters
    /// outside every group use `defaults`. All merged configurations are
    /// validated before the optimizer exists.
    pub fn with_param_groups(defaults: AdamWConfig, groups: Vec<ParamGroup>) -> Result<Self> {
        defaults.validate()?;
        let (groups, group_index) = resolve_groups(&defaults, groups)?;

        if defaults.lr == 0.0 {
            tracing::warn!("AdamW created with lr = 0; steps will only update moments");
        }
        tracing::debug!(
            lr = defaults.lr,
            beta1 = defaults.betas.0,
            beta2 = defaults.betas.1,
            eps = defaults.eps,
            weight_decay = defaults.weight_decay,
            correct_bias = defaults.correct_bias,
            groups = groups.len(),
            "created AdamW"
        );

        Ok(Self {
            defaults,
            groups,
            group_index,
            state: HashMap::new(),
        })
    }

    /// Perform one optimization step.
    ///
    /// Parameters are visited in ascending id order. Parameters without a
    /// gradient are left untouched and get no state. A sparse gradient fails
    /// with `UnsupportedGradient`; parameters updated earlier in the same call
    /// keep their update.
    pub fn step<C>(
        &mut self,
        client: &C,
        params: &mut HashMap<TensorId, Tensor<R>>,
        grads: &Gradients<R>,
    ) -> Result<()>
    where
        C: RuntimeClient<R> + BinaryOps<R> + UnaryOps<R> + ScalarOps<R>,
    {
        let mut param_ids: Vec<TensorId> = params.keys().copied().collect();
        param_ids.sort_by_key(|id| id.raw());
        let mut updated = 0usize;

        for id in param_ids {
            let grad = match grads.get(id) {
                Some(Gradient::Dense(g)) => g,
                Some(Gradient::Sparse(_)) => {
                    return Err(Error::UnsupportedGradient {
                        reason: "AdamW does not support sparse gradients".into(),
                    });
                }
                None => continue,
            };
            let Some(param) = params.get(&id) else {
                continue;
            };
            if grad.shape() != param.shape() {
                return Err(Error::InvalidArgument {
                    arg: "grads",
                    reason: format!(
                        "gradient shape {:?} does not match parameter shape {:?}",
                        grad.shape(),
                        param.shape()
                    ),
                });
            }

            let cfg = self.config_for(id).clone();
            let (beta1, beta2) = cfg.betas;

            let (prev_step, prev_m, prev_v) = match self.state.get(&id) {
                Some(s) => (s.step, s.exp_avg.clone(), s.exp_avg_sq.clone()),
                None => {
                    let zeros = Tensor::<R>::zeros(param.shape(), param.dtype(), param.device());
                    (0, zeros.clone(), zeros)
                }
            };
            let step = prev_step + 1;

            // m = beta1 * m + (1 - beta1) * g
            let m_scaled = client.mul_scalar(&prev_m, beta1)?;
            let g_scaled = client.mul_scalar(grad, 1.0 - beta1)?;
            let exp_avg = client.add(&m_scaled, &g_scaled)?;

            // v = beta2 * v + (1 - beta2) * g^2
            let v_scaled = client.mul_scalar(&prev_v, beta2)?;
            let g_sq = client.mul(grad, grad)?;
            let g_sq_scaled = client.mul_scalar(&g_sq, 1.0 - beta2)?;
            let exp_avg_sq = client.add(&v_scaled, &g_sq_scaled)?;

            let v_sqrt = client.sqrt(&exp_avg_sq)?;
            let (denom, step_size) = if cfg.correct_bias {
                let bc1 = 1.0 - beta1.powf(step as f64);
                let bc2 = 1.0 - beta2.powf(step as f64);
                let v_hat_sqrt = client.mul_scalar(&v_sqrt, bc2.sqrt().recip())?;
                (client.add_scalar(&v_hat_sqrt, cfg.eps)?, cfg.lr / bc1)
            } else {
                (client.add_scalar(&v_sqrt, cfg.eps)?, cfg.lr)
            };

            // p = p - step_size * m / denom
            let ratio = client.div(&exp_avg, &denom)?;
            let update = client.mul_scalar(&ratio, step_size)?;
            let mut new_param = client.sub(param, &update)?;

            // Decoupled decay on the already-updated parameter
            if cfg.weight_decay > 0.0 {
                let decay = client.mul_scalar(&new_param, cfg.weight_decay * cfg.lr)?;
                new_param = client.sub(&new_param, &decay)?;
            }

            self.state.insert(
                id,
                ParamState {
                    step,
                    exp_avg,
                    exp_avg_sq,
                },
            );
            params.insert(id, new_param);
            updated += 1;
        }

        tracing::trace!(
            updated,
            skipped = params.len() - updated,
            "AdamW step"
        );
        Ok(())
    }

    /// Recompute gradients with `closure`, then step.
    ///
    /// The closure sees the current parameters and returns the loss alongside
    /// its gradients; the loss is handed back unchanged.
    pub fn step_with_closure<C, L, F>(
        &mut self,
        client: &C,
        params: &mut HashMap<TensorId, Tensor<R>>,
        closure: F,
    ) -> Result<L>
    where
        C: RuntimeClient<R> + BinaryOps<R> + UnaryOps<R> + ScalarOps<R>,
        F: FnOnce(&HashMap<TensorId, Tensor<R>>) -> Result<(L, Gradients<R>)>,
    {
        let (loss, grads) = closure(params)?;
        self.step(client, params, &grads)?;
        Ok(loss)
    }
}

impl<R: Runtime> AdamW<R> {
    /// Default hyperparameters (used by parameters outside every group).
    pub fn config(&self) -> &AdamWConfig {
        &self.defaults
    }

    /// Hyperparameters in effect for `id`.
    pub fn config_for(&self, id: TensorId) -> &AdamWConfig {
        match self.group_index.get(&id) {
            Some(&gi) => &self.groups[gi].config,
            None => &self.defaults,
        }
    }

    pub fn param_groups(&self) -> &[ResolvedParamGroup] {
        &self.groups
    }

    pub fn state(&self, id: TensorId) -> Option<&ParamState<R>> {
        self.state.get(&id)
    }

    /// Set the learning rate of the defaults and of every group.
    pub fn set_lr(&mut self, lr: f64) {
        self.defaults.lr = lr;
        for group in &mut self.groups {
            group.config.lr = lr;
        }
    }

    pub fn lr(&self) -> f64 {
        self.defaults.lr
    }

    pub fn reset(&mut self) {
        self.state.clear();
    }
}

impl<R: Runtime<DType = DType>> Optimizer<R> for AdamW<R> {
    fn step<C>(
        &mut self,
        client: &C,
        params: &mut HashMap<TensorId, Tensor<R>>,
        grads: &Gradients<R>,
    ) -> Result<()>
    where
        C: RuntimeClient<R> + BinaryOps<R> + UnaryOps<R> + ScalarOps<R>,
    {
        AdamW::step(self, client, params, grads)
    }

    fn set_lr(&mut self, lr: f64) {
        AdamW::set_lr(self, lr);
    }

    fn lr(&self) -> f64 {
        AdamW::lr(self)
    }

    fn reset(&mut self) {
        AdamW::reset(self);
    }
}
