//! Causal multi-head attention core
//!
//! Composes numr autograd primitives: matmul, transpose, mul_scalar, add,
//! softmax, dropout. Same algorithm on every backend.

use crate::error::{Error, Result};
use crate::nn::Dropout;
use crate::ops::BlockClient;
use numr::autograd::{Var, var_add, var_matmul, var_mul_scalar, var_softmax, var_transpose};
use numr::dtype::DType;
use numr::ops::{ActivationOps, BinaryOps, ReduceOps, ScalarOps, TensorOps, UnaryOps};
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Result of [`causal_attention_impl`].
pub struct AttentionOutput<R: Runtime> {
    /// Weighted sum of values: `[B, H, T, D]`
    pub context: Var<R>,
    /// Attention probabilities after dropout: `[B, H, T, T]`
    pub probs: Var<R>,
}

/// Additive causal mask `[1, 1, T, T]`: 0 where key `j <= i`, -inf above the diagonal.
///
/// Rebuilt from `seq_len` on every call; nothing is cached.
pub fn causal_mask<R>(seq_len: usize, device: &R::Device) -> Tensor<R>
where
    R: Runtime<DType = DType>,
{
    let mut mask_data = vec![0.0f32; seq_len * seq_len];
    for i in 0..seq_len {
        for j in (i + 1)..seq_len {
            mask_data[i * seq_len + j] = f32::NEG_INFINITY;
        }
    }
    Tensor::<R>::from_slice(&mask_data, &[1, 1, seq_len, seq_len], device)
}

/// Masked scaled dot-product attention over pre-split heads:
///
/// ```text
/// probs   = dropout(softmax(Q @ K^T / sqrt(D) + causal + padding))
/// context = probs @ V
/// ```
///
/// `q`, `k`, `v` are `[B, H, T, D]`; `padding_mask` is an additive
/// `[B, 1, 1, T]` tensor (a batch dimension of 1 broadcasts). Every row keeps
/// its diagonal entry, so no row is fully masked by causality alone.
pub fn causal_attention_impl<R, C>(
    client: &C,
    q: &Var<R>,
    k: &Var<R>,
    v: &Var<R>,
    padding_mask: Option<&Var<R>>,
    dropout: &Dropout,
) -> Result<AttentionOutput<R>>
where
    R: Runtime<DType = DType>,
    C: BlockClient<R>,
    R::Client: TensorOps<R>
        + ScalarOps<R>
        + ReduceOps<R>
        + ActivationOps<R>
        + BinaryOps<R>
        + UnaryOps<R>,
{
    let q_shape = q.shape().to_vec();
    let k_shape = k.shape().to_vec();
    let v_shape = v.shape().to_vec();

    if q_shape.len() != 4 {
        return Err(Error::InvalidArgument {
            arg: "q",
            reason: format!("expected 4D [B, H, T, D], got {}D", q_shape.len()),
        });
    }
    if k_shape != q_shape {
        return Err(Error::InvalidArgument {
            arg: "k",
            reason: format!("q is {:?} but k is {:?} (must match)", q_shape, k_shape),
        });
    }
    if v_shape != q_shape {
        return Err(Error::InvalidArgument {
            arg: "v",
            reason: format!("q is {:?} but v is {:?} (must match)", q_shape, v_shape),
        });
    }

    let batch = q_shape[0];
    let seq_len = q_shape[2];
    let head_dim = q_shape[3];

    if let Some(m) = padding_mask {
        validate_padding_mask(m.shape(), batch, seq_len)?;
    }

    // Q @ K^T → [B, H, T, T], scaled by the per-head dimension
    let k_t = var_transpose(k).map_err(Error::Numr)?;
    let scores = var_matmul(q, &k_t, client).map_err(Error::Numr)?;
    let scale = (head_dim as f64).sqrt().recip();
    let scores = var_mul_scalar(&scores, scale, client).map_err(Error::Numr)?;

    // Causal positions go to -inf first, then the caller's padding mask
    let causal = Var::new(causal_mask::<R>(seq_len, q.tensor().device()), false);
    let scores = var_add(&scores, &causal, client).map_err(Error::Numr)?;
    let scores = match padding_mask {
        Some(m) => var_add(&scores, m, client).map_err(Error::Numr)?,
        None => scores,
    };

    let probs = var_softmax(&scores, -1, client).map_err(Error::Numr)?;
    let probs = dropout.forward(client, &probs)?;

    let context = var_matmul(&probs, v, client).map_err(Error::Numr)?;
    Ok(AttentionOutput { context, probs })
}

fn validate_padding_mask(shape: &[usize], batch: usize, seq_len: usize) -> Result<()> {
    let ok = shape.len() == 4
        && (shape[0] == batch || shape[0] == 1)
        && shape[1] == 1
        && shape[2] == 1
        && shape[3] == seq_len;
    if !ok {
        return Err(Error::InvalidArgument {
            arg: "attention_mask",
            reason: format!("expected [{batch}, 1, 1, {seq_len}], got {shape:?}"),
        });
    }
    Ok(())
}
