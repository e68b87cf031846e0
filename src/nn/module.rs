//! Core `Module` trait for all neural network layers.

use crate::tensor::Tensor;

/// Common interface for all layers.
///
/// In the graph-based architecture a `Module` is any component that adds a
/// fixed pattern of operations and parameters to the graph.
pub trait Module {
    /// "Symbolic" forward pass: builds the corresponding part of the graph.
    fn forward(&self, inputs: &Tensor) -> Tensor;

    /// Trainable parameters (as symbolic tensors) owned by this module.
    fn parameters(&self) -> Vec<Tensor>;
}
