//! Parameter groups with per-group hyperparameter overrides

use super::adamw::AdamWConfig;
use crate::error::{Error, Result};
use numr::tensor::TensorId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hyperparameters a group may override. Unset fields fall back to the
/// optimizer defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamGroupOverrides {
    #[serde(default)]
    pub lr: Option<f64>,
    #[serde(default)]
    pub betas: Option<(f64, f64)>,
    #[serde(default)]
    pub eps: Option<f64>,
    #[serde(default)]
    pub weight_decay: Option<f64>,
    #[serde(default)]
    pub correct_bias: Option<bool>,
}

impl ParamGroupOverrides {
    /// `defaults` with every set field replaced.
    pub fn merge(&self, defaults: &AdamWConfig) -> AdamWConfig {
        AdamWConfig {
            lr: self.lr.unwrap_or(defaults.lr),
            betas: self.betas.unwrap_or(defaults.betas),
            eps: self.eps.unwrap_or(defaults.eps),
            weight_decay: self.weight_decay.unwrap_or(defaults.weight_decay),
            correct_bias: self.correct_bias.unwrap_or(defaults.correct_bias),
        }
    }
}

/// A set of parameters sharing one set of hyperparameter overrides.
#[derive(Clone, Default)]
pub struct ParamGroup {
    pub params: Vec<TensorId>,
    pub overrides: ParamGroupOverrides,
}

impl ParamGroup {
    pub fn new(params: impl IntoIterator<Item = TensorId>) -> Self {
        Self {
            params: params.into_iter().collect(),
            overrides: ParamGroupOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: ParamGroupOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_lr(mut self, lr: f64) -> Self {
        self.overrides.lr = Some(lr);
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.overrides.weight_decay = Some(weight_decay);
        self
    }
}

/// A group after its overrides were merged over the defaults and validated.
#[derive(Clone)]
pub struct ResolvedParamGroup {
    pub params: Vec<TensorId>,
    pub config: AdamWConfig,
}

/// Merge and validate every group, and index parameters by group.
///
/// A parameter listed in two groups is a configuration error.
pub(crate) fn resolve_groups(
    defaults: &AdamWConfig,
    groups: Vec<ParamGroup>,
) -> Result<(Vec<ResolvedParamGroup>, HashMap<TensorId, usize>)> {
    let mut resolved = Vec::with_capacity(groups.len());
    let mut index = HashMap::new();

    for (gi, group) in groups.into_iter().enumerate() {
        let config = group.overrides.merge(defaults);
        config.validate().map_err(|e| match e {
            Error::InvalidConfig { reason } => Error::config(format!("param group {gi}: {reason}")),
            other => other,
        })?;

        for &id in &group.params {
            if let Some(prev) = index.insert(id, gi) {
                return Err(Error::config(format!(
                    "param group {gi}: a parameter already belongs to group {}",
                    prev
                )));
            }
        }
        resolved.push(ResolvedParamGroup {
            params: group.params,
            config,
        });
    }

    Ok((resolved, index))
}
