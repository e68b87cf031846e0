use super::config::ConfigError;
use super::report::SinkError;
use crate::analysis::shape_inference::ShapeInferenceError;
use crate::asg::{AsgError, Shape};
use crate::autograd::AutogradError;
use crate::optimizers::OptimizerError;
use crate::runtime::backend::RuntimeError;
use thiserror::Error;

/// Ошибки обучения WGAN-GP.
///
/// Precondition violations (`InvalidConfig`, `ShapeMismatch`, `EmptyData`,
/// `ShapeInference`, `Optimizer`) are raised before any optimizer step that
/// they concern.
#[derive(Error, Debug)]
pub enum GanError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Shape,
        actual: Shape,
    },

    #[error("Data source yields no batches for batch size {0}")]
    EmptyData(usize),

    #[error("Shape inference failed: {0}")]
    ShapeInference(#[from] ShapeInferenceError),

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("Numerical divergence in the {phase} phase: {quantity} = {value}")]
    NumericalDivergence {
        phase: &'static str,
        quantity: String,
        value: f32,
    },

    #[error("Reporting sink failed: {0}")]
    Sink(#[from] SinkError),

    #[error("Epoch {0} produced no batches")]
    EmptyEpoch(usize),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Autograd error: {0}")]
    Autograd(#[from] AutogradError),

    #[error("Graph error: {0}")]
    Graph(#[from] AsgError),
}

pub type GanResult<T> = Result<T, GanError>;
