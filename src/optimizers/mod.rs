//! Оптимизаторы для обновления весов модели.
//!
//! Оптимизаторы работают с реальными числовыми данными (`Value`) на CPU.
//! Each optimizer is bound to one network's parameter set at construction:
//! gradients are accumulated into a buffer keyed by parameter name, then
//! `step` applies the update rule to every parameter that has a gradient.

pub mod adam;
pub mod sgd;

pub use adam::Adam;
pub use sgd::Sgd;

use crate::asg::{Shape, Value};
use ndarray::ArrayD;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("Parameter '{0}' does not belong to this optimizer's parameter set")]
    UnknownParameter(String),

    #[error("Shape mismatch for '{name}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Shape,
        actual: Shape,
    },
}

pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Общий интерфейс всех оптимизаторов.
pub trait Optimizer {
    /// Clears the accumulated gradients.
    fn zero_grad(&mut self);

    /// Adds `gradients` to the accumulated ones.
    fn accumulate(&mut self, gradients: &HashMap<String, Value>) -> OptimizerResult<()>;

    /// Один шаг оптимизации. Parameters without an accumulated gradient
    /// are left untouched. Nothing is modified if validation fails.
    fn step(&mut self, parameters: &mut HashMap<String, Value>) -> OptimizerResult<()>;

    /// Number of completed `step` calls.
    fn step_count(&self) -> usize;

    fn learning_rate(&self) -> f32;
}

/// Accumulated gradients for a fixed set of named parameters.
#[derive(Debug, Clone)]
pub(crate) struct GradientBuffer {
    shapes: HashMap<String, Shape>,
    grads: HashMap<String, ArrayD<f32>>,
}

impl GradientBuffer {
    pub(crate) fn new(parameters: &HashMap<String, Value>) -> Self {
        Self {
            shapes: parameters.iter().map(|(name, v)| (name.clone(), v.shape())).collect(),
            grads: HashMap::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.grads.clear();
    }

    fn check(&self, name: &str, actual: Shape) -> OptimizerResult<()> {
        let expected = self
            .shapes
            .get(name)
            .ok_or_else(|| OptimizerError::UnknownParameter(name.to_string()))?;
        if *expected != actual {
            return Err(OptimizerError::ShapeMismatch {
                name: name.to_string(),
                expected: expected.clone(),
                actual,
            });
        }
        Ok(())
    }

    pub(crate) fn accumulate(&mut self, gradients: &HashMap<String, Value>) -> OptimizerResult<()> {
        for (name, grad) in gradients {
            self.check(name, grad.shape())?;
        }
        for (name, grad) in gradients {
            let grad = grad.to_tensor();
            match self.grads.get_mut(name) {
                Some(acc) => *acc += &grad,
                None => {
                    self.grads.insert(name.clone(), grad);
                }
            }
        }
        Ok(())
    }

    /// Every parameter must be known and keep its registered shape.
    pub(crate) fn check_parameters(&self, parameters: &HashMap<String, Value>) -> OptimizerResult<()> {
        for (name, value) in parameters {
            self.check(name, value.shape())?;
        }
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.grads.get(name)
    }
}

/// Moves the parameter out as an `ArrayD`; the caller writes it back.
pub(crate) fn take_tensor(value: &mut Value) -> ArrayD<f32> {
    std::mem::replace(value, Value::ScalarF32(0.0)).into_tensor()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn params() -> HashMap<String, Value> {
        HashMap::from([("w".to_string(), Value::Tensor(array![1.0f32, 2.0].into_dyn()))])
    }

    #[test]
    fn test_buffer_accumulates() {
        let mut buffer = GradientBuffer::new(&params());
        let g = HashMap::from([("w".to_string(), Value::Tensor(array![0.5f32, 1.0].into_dyn()))]);
        buffer.accumulate(&g).unwrap();
        buffer.accumulate(&g).unwrap();
        assert_eq!(buffer.get("w"), Some(&array![1.0f32, 2.0].into_dyn()));

        buffer.clear();
        assert!(buffer.get("w").is_none());
    }

    #[test]
    fn test_buffer_rejects_foreign_gradients() {
        let mut buffer = GradientBuffer::new(&params());
        let unknown = HashMap::from([("b".to_string(), Value::ScalarF32(1.0))]);
        assert_eq!(
            buffer.accumulate(&unknown),
            Err(OptimizerError::UnknownParameter("b".to_string()))
        );

        let wrong = HashMap::from([("w".to_string(), Value::Tensor(array![1.0f32].into_dyn()))]);
        assert!(matches!(
            buffer.accumulate(&wrong),
            Err(OptimizerError::ShapeMismatch { .. })
        ));
    }
}
