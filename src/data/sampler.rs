//! Стратегии сэмплирования индексов для DataLoader.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Генератор индексов образцов.
pub trait Sampler: Iterator<Item = usize> {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Индексы по порядку.
pub struct SequentialSampler {
    range: std::ops::Range<usize>,
    len: usize,
}

impl SequentialSampler {
    pub fn new(len: usize) -> Self {
        Self { range: 0..len, len }
    }
}

impl Iterator for SequentialSampler {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        self.range.next()
    }
}

impl Sampler for SequentialSampler {
    fn len(&self) -> usize {
        self.len
    }
}

/// Индексы в случайном порядке (перестановка без повторов).
pub struct RandomSampler {
    indices: Vec<usize>,
    current: usize,
}

impl RandomSampler {
    /// Перестановка из `thread_rng`.
    pub fn new(len: usize) -> Self {
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(&mut rand::thread_rng());
        Self { indices, current: 0 }
    }

    /// Воспроизводимая перестановка.
    pub fn with_seed(len: usize, seed: u64) -> Self {
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(&mut StdRng::seed_from_u64(seed));
        Self { indices, current: 0 }
    }
}

impl Iterator for RandomSampler {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.indices.get(self.current).copied()?;
        self.current += 1;
        Some(idx)
    }
}

impl Sampler for RandomSampler {
    fn len(&self) -> usize {
        self.indices.len()
    }
}

/// Группирует индексы в батчи.
pub struct BatchSampler<S: Sampler> {
    sampler: S,
    batch_size: usize,
    drop_last: bool,
}

impl<S: Sampler> BatchSampler<S> {
    /// * `drop_last` - отбросить последний неполный батч
    pub fn new(sampler: S, batch_size: usize, drop_last: bool) -> Self {
        Self {
            sampler,
            batch_size,
            drop_last,
        }
    }

    pub fn num_batches(&self) -> usize {
        num_batches(self.sampler.len(), self.batch_size, self.drop_last)
    }
}

impl<S: Sampler> Iterator for BatchSampler<S> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<usize> = self.sampler.by_ref().take(self.batch_size).collect();

        if batch.is_empty() || (batch.len() < self.batch_size && self.drop_last) {
            return None;
        }
        Some(batch)
    }
}

/// Число батчей для `len` образцов. Zero when `batch_size` is zero.
pub fn num_batches(len: usize, batch_size: usize, drop_last: bool) -> usize {
    if batch_size == 0 {
        0
    } else if drop_last {
        len / batch_size
    } else {
        len.div_ceil(batch_size)
    }
}
