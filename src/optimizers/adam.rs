//! Adam (Adaptive Moment Estimation).
//!
//! ```text
//! m_t = β₁ m_{t-1} + (1 − β₁) g_t
//! v_t = β₂ v_{t-1} + (1 − β₂) g_t²
//! m̂_t = m_t / (1 − β₁^t),  v̂_t = v_t / (1 − β₂^t)
//! θ_t = θ_{t-1} − lr · m̂_t / (√v̂_t + ε)
//! ```

use super::{take_tensor, GradientBuffer, Optimizer, OptimizerResult};
use crate::asg::Value;
use ndarray::ArrayD;
use std::collections::HashMap;

pub const DEFAULT_LR: f32 = 2e-4;
pub const DEFAULT_BETA1: f32 = 0.5;
pub const DEFAULT_BETA2: f32 = 0.999;
pub const DEFAULT_EPSILON: f32 = 1e-8;

pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    buffer: GradientBuffer,
    /// Первый и второй моменты по имени параметра.
    m: HashMap<String, ArrayD<f32>>,
    v: HashMap<String, ArrayD<f32>>,
    timestep: usize,
}

impl Adam {
    /// Adam with `β1 = 0.5, β2 = 0.999, ε = 1e-8`.
    pub fn new(lr: f32, parameters: &HashMap<String, Value>) -> Self {
        Self::with_betas(lr, DEFAULT_BETA1, DEFAULT_BETA2, DEFAULT_EPSILON, parameters)
    }

    pub fn with_betas(
        lr: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        parameters: &HashMap<String, Value>,
    ) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            buffer: GradientBuffer::new(parameters),
            m: HashMap::new(),
            v: HashMap::new(),
            timestep: 0,
        }
    }
}

impl Optimizer for Adam {
    fn zero_grad(&mut self) {
        self.buffer.clear();
    }

    fn accumulate(&mut self, gradients: &HashMap<String, Value>) -> OptimizerResult<()> {
        self.buffer.accumulate(gradients)
    }

    fn step(&mut self, parameters: &mut HashMap<String, Value>) -> OptimizerResult<()> {
        self.buffer.check_parameters(parameters)?;
        self.timestep += 1;

        let (b1, b2, eps, lr) = (self.beta1, self.beta2, self.epsilon, self.lr);
        let bias1 = 1.0 - b1.powi(self.timestep as i32);
        let bias2 = 1.0 - b2.powi(self.timestep as i32);

        for (name, value) in parameters.iter_mut() {
            let grad = match self.buffer.get(name) {
                Some(g) => g,
                None => continue,
            };
            let first = self
                .m
                .entry(name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
            let second = self
                .v
                .entry(name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));

            let mut param = take_tensor(value);
            ndarray::azip!((p in &mut param, m in first, v in second, &g in grad) {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
            *value = Value::Tensor(param);
        }
        Ok(())
    }

    fn step_count(&self) -> usize {
        self.timestep
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}
