//! Трейт Dataset и датасет в памяти.

use ndarray::{ArrayD, Axis, IxDyn};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Samples array must have a leading sample axis, got shape {0:?}")]
    MissingSampleAxis(Vec<usize>),
}

/// Источник образцов, доступных по индексу.
pub trait Dataset: Send + Sync {
    type Item;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Option<Self::Item>;
}

/// Датасет, полностью хранящийся в памяти: массив формы `[num_samples, ...]`.
///
/// Labels are not stored; adversarial training only needs the samples.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    samples: Arc<ArrayD<f32>>,
    num_samples: usize,
}

impl InMemoryDataset {
    pub fn new(samples: ArrayD<f32>) -> Result<Self, DataError> {
        let num_samples = *samples
            .shape()
            .first()
            .ok_or_else(|| DataError::MissingSampleAxis(samples.shape().to_vec()))?;
        Ok(Self {
            samples: Arc::new(samples),
            num_samples,
        })
    }

    /// Форма одного образца (без batch dimension).
    pub fn sample_shape(&self) -> Vec<usize> {
        self.samples.shape()[1..].to_vec()
    }

    /// Собирает батч из образцов с заданными индексами.
    pub fn get_batch(&self, indices: &[usize]) -> ArrayD<f32> {
        let mut batch_shape = vec![indices.len()];
        batch_shape.extend(self.sample_shape());

        let mut batch = ArrayD::zeros(IxDyn(&batch_shape));
        for (i, &idx) in indices.iter().enumerate() {
            let sample = self.samples.index_axis(Axis(0), idx);
            batch.index_axis_mut(Axis(0), i).assign(&sample);
        }
        batch
    }

    pub fn samples(&self) -> &ArrayD<f32> {
        &self.samples
    }
}

impl Dataset for InMemoryDataset {
    type Item = ArrayD<f32>;

    fn len(&self) -> usize {
        self.num_samples
    }

    fn get(&self, index: usize) -> Option<Self::Item> {
        if index >= self.num_samples {
            return None;
        }
        Some(self.samples.index_axis(Axis(0), index).to_owned())
    }
}
