//! Преобразования данных для предобработки.

use ndarray::ArrayD;

/// Преобразование массива данных.
pub trait Transform: Send + Sync {
    fn apply(&self, data: ArrayD<f32>) -> ArrayD<f32>;
}

/// Нормализация: `(x - mean) / std`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalize {
    mean: f32,
    std: f32,
}

impl Normalize {
    pub fn new(mean: f32, std: f32) -> Self {
        Self { mean, std }
    }

    /// Maps `[0, 1]` pixel data onto `[-1, 1]`, the range of a `tanh` generator.
    pub fn to_symmetric_unit() -> Self {
        Self::new(0.5, 0.5)
    }

    /// Параметры нормализации, вычисленные по данным.
    pub fn fit(data: &ArrayD<f32>) -> Self {
        let mean = data.mean().unwrap_or(0.0);
        let std = data.std(0.0).max(1e-8);
        Self::new(mean, std)
    }
}

impl Transform for Normalize {
    fn apply(&self, data: ArrayD<f32>) -> ArrayD<f32> {
        let (mean, std) = (self.mean, self.std);
        data.mapv(|x| (x - mean) / std)
    }
}
