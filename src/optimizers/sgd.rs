//! Stochastic Gradient Descent.

use super::{take_tensor, GradientBuffer, Optimizer, OptimizerResult};
use crate::asg::Value;
use std::collections::HashMap;

/// `param = param - lr * grad`
pub struct Sgd {
    lr: f32,
    buffer: GradientBuffer,
    steps: usize,
}

impl Sgd {
    pub fn new(lr: f32, parameters: &HashMap<String, Value>) -> Self {
        Self {
            lr,
            buffer: GradientBuffer::new(parameters),
            steps: 0,
        }
    }
}

impl Optimizer for Sgd {
    fn zero_grad(&mut self) {
        self.buffer.clear();
    }

    fn accumulate(&mut self, gradients: &HashMap<String, Value>) -> OptimizerResult<()> {
        self.buffer.accumulate(gradients)
    }

    fn step(&mut self, parameters: &mut HashMap<String, Value>) -> OptimizerResult<()> {
        self.buffer.check_parameters(parameters)?;
        for (name, value) in parameters.iter_mut() {
            if let Some(grad) = self.buffer.get(name) {
                let lr = self.lr;
                let mut param = take_tensor(value);
                ndarray::azip!((p in &mut param, &g in grad) *p -= lr * g);
                *value = Value::Tensor(param);
            }
        }
        self.steps += 1;
        Ok(())
    }

    fn step_count(&self) -> usize {
        self.steps
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizers::OptimizerError;
    use ndarray::array;

    #[test]
    fn test_sgd_step() {
        let mut params = HashMap::from([
            ("w".to_string(), Value::Tensor(array![1.0f32, 2.0].into_dyn())),
            ("b".to_string(), Value::Tensor(array![0.5f32].into_dyn())),
        ]);
        let mut sgd = Sgd::new(0.1, &params);
        let grads = HashMap::from([("w".to_string(), Value::Tensor(array![1.0f32, -1.0].into_dyn()))]);

        sgd.zero_grad();
        sgd.accumulate(&grads).unwrap();
        sgd.step(&mut params).unwrap();

        assert_eq!(params["w"], Value::Tensor(array![0.9f32, 2.1].into_dyn()));
        // без градиента - без изменений
        assert_eq!(params["b"], Value::Tensor(array![0.5f32].into_dyn()));
        assert_eq!(sgd.step_count(), 1);
    }

    #[test]
    fn test_step_rejects_unknown_parameter() {
        let params = HashMap::from([("w".to_string(), Value::Tensor(array![1.0f32].into_dyn()))]);
        let mut sgd = Sgd::new(0.1, &params);
        let mut other = HashMap::from([("v".to_string(), Value::Tensor(array![1.0f32].into_dyn()))]);

        assert_eq!(sgd.step(&mut other), Err(OptimizerError::UnknownParameter("v".to_string())));
        assert_eq!(sgd.step_count(), 0);
    }
}
