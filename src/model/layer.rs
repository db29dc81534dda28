//! Pre-norm decoder layer
//!
//! ```text
//! h   = x + dropout(attention_dense(attn(ln1(x), mask)))
//! out = h + dropout(out_dense(act(interm_dense(ln2(h)))))
//! ```
//!
//! The residual base of each sub-block is its pre-normalization input.

use super::attention::CausalSelfAttention;
use super::config::TransformerConfig;
use crate::error::{Error, Result};
use crate::nn::module::{Module, prefixed};
use crate::nn::{Activation, Dropout, LayerNorm, Linear, TrainMode, VarBuilder};
use crate::ops::BlockClient;
use numr::autograd::{Var, var_add};
use numr::dtype::DType;
use numr::ops::{ActivationOps, BinaryOps, ReduceOps, ScalarOps, TensorOps, UnaryOps};
use numr::runtime::Runtime;
use numr::tensor::{Tensor, TensorId};
use std::collections::HashMap;

/// One transformer block: causal self-attention and a feed-forward network,
/// each behind a LayerNorm and wrapped in a residual connection.
pub struct TransformerLayer<R: Runtime> {
    self_attention: CausalSelfAttention<R>,
    attention_dense: Linear<R>,
    attention_dropout: Dropout,
    attention_layer_norm: LayerNorm<R>,
    interm_dense: Linear<R>,
    activation: Activation,
    out_dense: Linear<R>,
    out_dropout: Dropout,
    out_layer_norm: LayerNorm<R>,
}

impl<R: Runtime<DType = DType>> TransformerLayer<R> {
    /// Build all sub-layers under the builder's prefix, initializing any
    /// tensor the map does not already hold.
    pub fn new(config: &TransformerConfig, vb: &mut VarBuilder<'_, R>) -> Result<Self> {
        config.validate()?;
        let hidden = config.hidden_size;
        let inter = config.intermediate_size;

        let self_attention = CausalSelfAttention::new(config, &mut vb.pp("self_attention"))?;
        let attention_dense = Linear::from_builder(&mut vb.pp("attention_dense"), hidden, hidden)?;
        let attention_layer_norm = LayerNorm::from_builder(
            &mut vb.pp("attention_layer_norm"),
            hidden,
            config.layer_norm_eps,
        )?;
        let interm_dense = Linear::from_builder(&mut vb.pp("interm_dense"), hidden, inter)?;
        let out_dense = Linear::from_builder(&mut vb.pp("out_dense"), inter, hidden)?;
        let out_layer_norm =
            LayerNorm::from_builder(&mut vb.pp("out_layer_norm"), hidden, config.layer_norm_eps)?;

        tracing::debug!(
            prefix = vb.prefix(),
            hidden_size = hidden,
            intermediate_size = inter,
            activation = %config.hidden_act,
            "built transformer layer"
        );

        Ok(Self {
            self_attention,
            attention_dense,
            attention_dropout: Dropout::new(config.hidden_dropout_prob)?,
            attention_layer_norm,
            interm_dense,
            activation: config.hidden_act,
            out_dense,
            out_dropout: Dropout::new(config.hidden_dropout_prob)?,
            out_layer_norm,
        })
    }

    /// `hidden_states` `[B, T, H]`, additive `attention_mask` `[B, 1, 1, T]`.
    /// Output has the input's shape.
    pub fn forward<C>(
        &self,
        client: &C,
        hidden_states: &Var<R>,
        attention_mask: &Var<R>,
    ) -> Result<Var<R>>
    where
        C: BlockClient<R>,
        R::Client: TensorOps<R>
            + ScalarOps<R>
            + ReduceOps<R>
            + ActivationOps<R>
            + BinaryOps<R>
            + UnaryOps<R>,
    {
        tracing::trace!(shape = ?hidden_states.shape(), "transformer layer forward");

        // Attention sub-block
        let normed = self.attention_layer_norm.forward(client, hidden_states)?;
        let attn = self
            .self_attention
            .forward(client, &normed, attention_mask)?;
        let hidden = Self::add(
            client,
            hidden_states,
            &attn,
            &self.attention_dense,
            &self.attention_dropout,
        )?;

        // Feed-forward sub-block
        let normed = self.out_layer_norm.forward(client, &hidden)?;
        let inter = self.interm_dense.forward(client, &normed)?;
        let inter = self.activation.forward(client, &inter)?;
        Self::add(client, &hidden, &inter, &self.out_dense, &self.out_dropout)
    }

    /// Residual merge: `input + dropout(dense(output))`. No normalization.
    pub fn add<C>(
        client: &C,
        input: &Var<R>,
        output: &Var<R>,
        dense: &Linear<R>,
        dropout: &Dropout,
    ) -> Result<Var<R>>
    where
        C: BlockClient<R>,
        R::Client: TensorOps<R> + ScalarOps<R> + BinaryOps<R>,
    {
        let projected = dense.forward(client, output)?;
        let projected = dropout.forward(client, &projected)?;
        var_add(input, &projected, client).map_err(Error::Numr)
    }
}

impl<R: Runtime> TransformerLayer<R> {
    pub fn self_attention(&self) -> &CausalSelfAttention<R> {
        &self.self_attention
    }

    pub fn attention_dense(&self) -> &Linear<R> {
        &self.attention_dense
    }

    pub fn attention_layer_norm(&self) -> &LayerNorm<R> {
        &self.attention_layer_norm
    }

    pub fn interm_dense(&self) -> &Linear<R> {
        &self.interm_dense
    }

    pub fn out_dense(&self) -> &Linear<R> {
        &self.out_dense
    }

    pub fn out_layer_norm(&self) -> &LayerNorm<R> {
        &self.out_layer_norm
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl<R: Runtime> TrainMode for TransformerLayer<R> {
    fn set_training(&mut self, training: bool) {
        self.self_attention.set_training(training);
        self.attention_dropout.set_training(training);
        self.out_dropout.set_training(training);
    }

    fn is_training(&self) -> bool {
        self.attention_dropout.is_training()
    }
}

impl<R: Runtime> Module<R> for TransformerLayer<R> {
    fn parameters(&self) -> Vec<&Var<R>> {
        self.named_parameters().into_iter().map(|(_, v)| v).collect()
    }

    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        let mut named = prefixed("self_attention", self.self_attention.named_parameters());
        named.extend(prefixed(
            "attention_dense",
            self.attention_dense.named_parameters(),
        ));
        named.extend(prefixed(
            "attention_layer_norm",
            self.attention_layer_norm.named_parameters(),
        ));
        named.extend(prefixed("interm_dense", self.interm_dense.named_parameters()));
        named.extend(prefixed("out_dense", self.out_dense.named_parameters()));
        named.extend(prefixed(
            "out_layer_norm",
            self.out_layer_norm.named_parameters(),
        ));
        named
    }

    fn load_parameters(&mut self, params: &HashMap<TensorId, Tensor<R>>) {
        self.self_attention.load_parameters(params);
        self.attention_dense.load_parameters(params);
        self.attention_layer_norm.load_parameters(params);
        self.interm_dense.load_parameters(params);
        self.out_dense.load_parameters(params);
        self.out_layer_norm.load_parameters(params);
    }
}
