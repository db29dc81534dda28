pub mod adamw;
pub mod gradient;
pub mod param_group;
pub mod traits;

pub use adamw::{AdamW, AdamWConfig, ParamState};
pub use gradient::{Gradient, Gradients, SparseGradient};
pub use param_group::{ParamGroup, ParamGroupOverrides, ResolvedParamGroup};
pub use traits::Optimizer;
