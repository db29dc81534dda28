//! Composite operations built from numr autograd primitives.

pub mod attention;

pub use attention::{AttentionOutput, causal_attention_impl, causal_mask};

use numr::ops::{
    ActivationOps, BinaryOps, RandomOps, ReduceOps, ScalarOps, TensorOps, UnaryOps,
};
use numr::runtime::{Runtime, RuntimeClient};

/// Trait alias for the client bounds required by the attention block and
/// transformer layer forward passes.
pub trait BlockClient<R: Runtime>:
    RuntimeClient<R>
    + TensorOps<R>
    + ScalarOps<R>
    + ReduceOps<R>
    + ActivationOps<R>
    + BinaryOps<R>
    + UnaryOps<R>
    + RandomOps<R>
{
}

impl<R, C> BlockClient<R> for C
where
    R: Runtime,
    C: RuntimeClient<R>
        + TensorOps<R>
        + ScalarOps<R>
        + ReduceOps<R>
        + ActivationOps<R>
        + BinaryOps<R>
        + UnaryOps<R>
        + RandomOps<R>,
{
}
