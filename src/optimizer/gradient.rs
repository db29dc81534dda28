//! Gradient containers consumed by optimizers
//!
//! numr's `GradStore` only ever holds dense tensors. Embedding-style layers in
//! other frameworks can hand back row-sparse gradients; `Gradient::Sparse`
//! keeps that case representable so optimizers can reject it explicitly.

use numr::autograd::GradStore;
use numr::runtime::Runtime;
use numr::tensor::{Tensor, TensorId};
use std::collections::HashMap;

/// Row-sparse gradient: `values[k]` is the gradient of row `indices[k]` of a
/// parameter shaped `dense_shape`.
pub struct SparseGradient<R: Runtime> {
    pub indices: Vec<usize>,
    pub values: Tensor<R>,
    pub dense_shape: Vec<usize>,
}

/// Gradient of a single parameter.
pub enum Gradient<R: Runtime> {
    Dense(Tensor<R>),
    Sparse(SparseGradient<R>),
}

impl<R: Runtime> Gradient<R> {
    pub fn is_sparse(&self) -> bool {
        matches!(self, Gradient::Sparse(_))
    }

    pub fn as_dense(&self) -> Option<&Tensor<R>> {
        match self {
            Gradient::Dense(t) => Some(t),
            Gradient::Sparse(_) => None,
        }
    }
}

/// Gradients keyed by parameter identity.
pub struct Gradients<R: Runtime> {
    grads: HashMap<TensorId, Gradient<R>>,
}

impl<R: Runtime> Gradients<R> {
    pub fn new() -> Self {
        Self {
            grads: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: TensorId, grad: Gradient<R>) {
        self.grads.insert(id, grad);
    }

    pub fn insert_dense(&mut self, id: TensorId, grad: Tensor<R>) {
        self.grads.insert(id, Gradient::Dense(grad));
    }

    pub fn insert_sparse(&mut self, id: TensorId, grad: SparseGradient<R>) {
        self.grads.insert(id, Gradient::Sparse(grad));
    }

    pub fn get(&self, id: TensorId) -> Option<&Gradient<R>> {
        self.grads.get(&id)
    }

    pub fn contains(&self, id: TensorId) -> bool {
        self.grads.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &TensorId> {
        self.grads.keys()
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }
}

impl<R: Runtime> Default for Gradients<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Every gradient produced by `numr::autograd::backward`, as dense entries.
impl<R: Runtime> From<&GradStore<R>> for Gradients<R> {
    fn from(store: &GradStore<R>) -> Self {
        let mut grads = Self::new();
        let ids: Vec<TensorId> = store.keys().copied().collect();
        for id in ids {
            if let Some(g) = store.get(id) {
                grads.insert_dense(id, g.clone());
            }
        }
        grads
    }
}

impl<R: Runtime> From<GradStore<R>> for Gradients<R> {
    fn from(store: GradStore<R>) -> Self {
        Self::from(&store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::cpu_setup;
    use numr::runtime::cpu::CpuRuntime;

    #[test]
    fn test_from_grad_store() {
        let (_client, device) = cpu_setup();
        let a = TensorId::new();
        let b = TensorId::new();
        let mut store = GradStore::<CpuRuntime>::new();
        store.insert(a, Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0], &[2], &device));
        store.insert(b, Tensor::<CpuRuntime>::from_slice(&[3.0f32], &[1], &device));

        let grads = Gradients::from(&store);
        assert_eq!(grads.len(), 2);
        let ga = grads.get(a).and_then(Gradient::as_dense).unwrap();
        assert_eq!(ga.to_vec::<f32>(), vec![1.0, 2.0]);
        assert!(!grads.get(b).unwrap().is_sparse());
        assert!(grads.get(TensorId::new()).is_none());
    }

    #[test]
    fn test_sparse_entry() {
        let (_client, device) = cpu_setup();
        let id = TensorId::new();
        let mut grads = Gradients::<CpuRuntime>::new();
        grads.insert_sparse(
            id,
            SparseGradient {
                indices: vec![1],
                values: Tensor::<CpuRuntime>::from_slice(&[0.5f32, 0.5], &[1, 2], &device),
                dense_shape: vec![4, 2],
            },
        );
        let g = grads.get(id).unwrap();
        assert!(g.is_sparse());
        assert!(g.as_dense().is_none());
    }
}
