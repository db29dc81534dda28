//! Causal multi-head self-attention
//!
//! Projects hidden states to Q/K/V, splits heads, runs masked scaled
//! dot-product attention and merges the heads back. There is no output
//! projection here: the enclosing [`TransformerLayer`](super::TransformerLayer)
//! owns `attention_dense`.

use super::config::TransformerConfig;
use crate::error::{Error, Result};
use crate::nn::module::{Module, prefixed, var_contiguous, var_copy};
use crate::nn::{Dropout, Linear, TrainMode, VarBuilder};
use crate::ops::{AttentionOutput, BlockClient, causal_attention_impl};
use numr::autograd::{Var, var_permute, var_reshape};
use numr::dtype::DType;
use numr::ops::{ActivationOps, BinaryOps, ReduceOps, ScalarOps, TensorOps, UnaryOps};
use numr::runtime::Runtime;
use numr::tensor::{Tensor, TensorId};
use std::collections::HashMap;

/// Multi-head causal self-attention: `[B, T, H]` → `[B, T, H]`.
pub struct CausalSelfAttention<R: Runtime> {
    query: Linear<R>,
    key: Linear<R>,
    value: Linear<R>,
    dropout: Dropout,
    num_heads: usize,
    head_size: usize,
}

impl<R: Runtime<DType = DType>> CausalSelfAttention<R> {
    /// Build from `query`, `key`, `value` under the builder's prefix
    /// (each `weight [H, H]` and `bias [H]`), initializing missing tensors.
    pub fn new(config: &TransformerConfig, vb: &mut VarBuilder<'_, R>) -> Result<Self> {
        config.validate()?;
        let hidden = config.hidden_size;

        let query = Linear::from_builder(&mut vb.pp("query"), hidden, hidden)?;
        let key = Linear::from_builder(&mut vb.pp("key"), hidden, hidden)?;
        let value = Linear::from_builder(&mut vb.pp("value"), hidden, hidden)?;
        let dropout = Dropout::new(config.attention_probs_dropout_prob)?;

        tracing::debug!(
            hidden_size = hidden,
            num_heads = config.num_attention_heads,
            head_size = config.head_size(),
            "built causal self-attention"
        );

        Ok(Self {
            query,
            key,
            value,
            dropout,
            num_heads: config.num_attention_heads,
            head_size: config.head_size(),
        })
    }
}

impl<R: Runtime<DType = DType>> CausalSelfAttention<R> {
    /// Attend over `hidden_states` `[B, T, H]` with an additive padding mask
    /// `[B, 1, 1, T]`. Returns `[B, T, H]`.
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
        let (batch, seq_len) = self.check_input(hidden_states)?;
        let out = self.attend(client, hidden_states, attention_mask)?;

        // [B, nh, T, hs] → [B, T, nh, hs] → [B, T, H]
        let context = var_permute(&out.context, &[0, 2, 1, 3]).map_err(Error::Numr)?;
        let context = var_contiguous(&context, client)?;
        var_reshape(&context, &[batch, seq_len, self.hidden_size()]).map_err(Error::Numr)
    }

    /// Post-dropout attention probabilities `[B, nh, T, T]` for the same inputs
    /// as [`forward`](Self::forward).
    pub fn attention_probs<C>(
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
        self.check_input(hidden_states)?;
        Ok(self.attend(client, hidden_states, attention_mask)?.probs)
    }

    fn attend<C>(
        &self,
        client: &C,
        hidden_states: &Var<R>,
        attention_mask: &Var<R>,
    ) -> Result<AttentionOutput<R>>
    where
        C: BlockClient<R>,
        R::Client: TensorOps<R>
            + ScalarOps<R>
            + ReduceOps<R>
            + ActivationOps<R>
            + BinaryOps<R>
            + UnaryOps<R>,
    {
        let q = self.split_heads(client, &self.query.forward(client, hidden_states)?)?;
        let k = self.split_heads(client, &self.key.forward(client, hidden_states)?)?;
        let v = self.split_heads(client, &self.value.forward(client, hidden_states)?)?;

        tracing::trace!(shape = ?q.shape(), "attention heads");
        causal_attention_impl(client, &q, &k, &v, Some(attention_mask), &self.dropout)
    }

    /// `[B, T, H]` → `[B, nh, T, hs]`
    fn split_heads<C>(&self, client: &C, x: &Var<R>) -> Result<Var<R>>
    where
        C: BlockClient<R>,
        R::Client: TensorOps<R> + ScalarOps<R>,
    {
        let shape = x.shape();
        let (batch, seq_len) = (shape[0], shape[1]);
        let x = var_reshape(x, &[batch, seq_len, self.num_heads, self.head_size])
            .map_err(Error::Numr)?;
        let x = var_copy(&x, client)?;
        let x = var_permute(&x, &[0, 2, 1, 3]).map_err(Error::Numr)?;
        var_contiguous(&x, client)
    }

    fn check_input(&self, hidden_states: &Var<R>) -> Result<(usize, usize)> {
        let shape = hidden_states.shape();
        if shape.len() != 3 || shape[2] != self.hidden_size() {
            return Err(Error::InvalidArgument {
                arg: "hidden_states",
                reason: format!(
                    "expected [B, T, {}], got {:?}",
                    self.hidden_size(),
                    shape
                ),
            });
        }
        Ok((shape[0], shape[1]))
    }
}

impl<R: Runtime> CausalSelfAttention<R> {
    pub fn query(&self) -> &Linear<R> {
        &self.query
    }

    pub fn key(&self) -> &Linear<R> {
        &self.key
    }

    pub fn value(&self) -> &Linear<R> {
        &self.value
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn head_size(&self) -> usize {
        self.head_size
    }

    pub fn hidden_size(&self) -> usize {
        self.num_heads * self.head_size
    }
}

impl<R: Runtime> TrainMode for CausalSelfAttention<R> {
    fn set_training(&mut self, training: bool) {
        self.dropout.set_training(training);
    }

    fn is_training(&self) -> bool {
        self.dropout.is_training()
    }
}

impl<R: Runtime> Module<R> for CausalSelfAttention<R> {
    fn parameters(&self) -> Vec<&Var<R>> {
        let mut params = self.query.parameters();
        params.extend(self.key.parameters());
        params.extend(self.value.parameters());
        params
    }

    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        let mut named = prefixed("query", self.query.named_parameters());
        named.extend(prefixed("key", self.key.named_parameters()));
        named.extend(prefixed("value", self.value.named_parameters()));
        named
    }

    fn load_parameters(&mut self, params: &HashMap<TensorId, Tensor<R>>) {
        self.query.load_parameters(params);
        self.key.load_parameters(params);
        self.value.load_parameters(params);
    }
}
