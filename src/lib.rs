//! # nanoblock
//!
//! **Pre-norm decoder block and AdamW, built on numr.**
//!
//! nanoblock provides the repeating unit of a GPT-style language model and the
//! optimizer used to train it. Tensors, runtime clients and reverse-mode
//! autodiff all come from numr; every layer here is a composition of numr's
//! `var_*` primitives, so the same code runs on any numr backend and
//! `numr::autograd::backward` differentiates through it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 nanoblock ◄── YOU ARE HERE              │
//! │  (causal self-attention, transformer layer, AdamW)      │
//! └──────────────────────────┬──────────────────────────────┘
//! │                      numr                               │
//! │     (tensors, ops, runtime, autograd)                   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Layout
//!
//! - [`nn`]: Linear, LayerNorm, Dropout, activations, parameter builders
//! - [`ops`]: causal mask and masked scaled-dot-product attention
//! - [`model`]: [`TransformerConfig`], [`CausalSelfAttention`], [`TransformerLayer`]
//! - [`optimizer`]: [`AdamW`] with per-parameter state and parameter groups

pub mod error;
pub mod model;
pub mod nn;
pub mod ops;
pub mod optimizer;

pub use error::{Error, Result};
pub use model::{CausalSelfAttention, TransformerConfig, TransformerLayer};
pub use nn::{Module, TrainMode, VarBuilder, VarMap};
pub use optimizer::{AdamW, AdamWConfig, Gradient, Gradients, Optimizer, ParamGroup};

// Re-export numr types that users will commonly need
pub use numr::dtype::DType;
pub use numr::error::{Error as NumrError, Result as NumrResult};
pub use numr::runtime::{Runtime, RuntimeClient};
pub use numr::tensor::Tensor;
