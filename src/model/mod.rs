//! Decoder block: configuration, causal self-attention, transformer layer.

pub mod attention;
pub mod config;
pub mod layer;

pub use attention::CausalSelfAttention;
pub use config::TransformerConfig;
pub use layer::TransformerLayer;
