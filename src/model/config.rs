//! Transformer layer configuration
//!
//! Loadable from YAML or JSON. Field names match HuggingFace-style configs.

use crate::error::{Error, Result};
use crate::nn::Activation;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hyperparameters shared by [`CausalSelfAttention`](super::CausalSelfAttention)
/// and [`TransformerLayer`](super::TransformerLayer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerConfig {
    /// Model width H
    pub hidden_size: usize,
    /// Number of attention heads; must divide `hidden_size`
    pub num_attention_heads: usize,
    /// Feed-forward inner width
    pub intermediate_size: usize,
    /// Dropout applied to attention probabilities
    pub attention_probs_dropout_prob: f64,
    /// Dropout applied after each dense projection feeding a residual
    pub hidden_dropout_prob: f64,
    /// LayerNorm epsilon
    pub layer_norm_eps: f64,

    /// Feed-forward nonlinearity
    #[serde(default)]
    pub hidden_act: Activation,
}

impl TransformerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 {
            return Err(Error::config("hidden_size must be > 0"));
        }
        if self.num_attention_heads == 0 {
            return Err(Error::config("num_attention_heads must be > 0"));
        }
        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(Error::config(format!(
                "hidden_size ({}) must be divisible by num_attention_heads ({})",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.intermediate_size == 0 {
            return Err(Error::config("intermediate_size must be > 0"));
        }
        for (name, p) in [
            ("attention_probs_dropout_prob", self.attention_probs_dropout_prob),
            ("hidden_dropout_prob", self.hidden_dropout_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::config(format!("{name} must be in [0, 1], got {p}")));
            }
        }
        if self.layer_norm_eps.is_nan() || self.layer_norm_eps < 0.0 {
            return Err(Error::config(format!(
                "layer_norm_eps must be >= 0, got {}",
                self.layer_norm_eps
            )));
        }
        Ok(())
    }

    /// Per-head dimension: `hidden_size / num_attention_heads`.
    pub fn head_size(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    pub fn load_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::ModelError {
            reason: format!("IO error: {e}"),
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| Error::ModelError {
            reason: format!("YAML parse error: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::ModelError {
            reason: format!("IO error: {e}"),
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::ModelError {
            reason: format!("JSON parse error: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }
}

/// GPT-2 small.
impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            hidden_size: 768,
            num_attention_heads: 12,
            intermediate_size: 3072,
            attention_probs_dropout_prob: 0.1,
            hidden_dropout_prob: 0.1,
            layer_norm_eps: 1e-5,
            hidden_act: Activation::Gelu,
        }
    }
}
