//! Trainable networks: a graph-building forward pass plus the concrete
//! parameter values that feed it.

use crate::asg::Value;
use crate::tensor::Tensor;
use std::collections::HashMap;

/// A network whose parameters are bound to graph `Parameter` nodes by name.
///
/// `forward` may be called several times in the same graph (the critic is
/// applied to real, fake and interpolated batches); every call must refer
/// to the same parameter names so the nodes are shared.
pub trait Network {
    /// Prefix of every parameter name, e.g. `"generator"`.
    fn name(&self) -> &str;

    /// Builds the network's computation on top of `input`.
    fn forward(&self, input: &Tensor) -> Tensor;

    fn parameters(&self) -> &HashMap<String, Value>;

    fn parameters_mut(&mut self) -> &mut HashMap<String, Value>;

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().values().map(|v| v.shape().iter().product::<usize>()).sum()
    }
}
