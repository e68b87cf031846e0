//! DataLoader - итератор по батчам данных.

use super::dataset::{Dataset, InMemoryDataset};
use super::sampler::{num_batches, BatchSampler, RandomSampler, SequentialSampler};
use super::source::DataSource;
use ndarray::ArrayD;

/// Батч образцов.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[batch, ...sample_shape]`
    pub samples: ArrayD<f32>,
    /// Индексы образцов в датасете
    pub indices: Vec<usize>,
}

impl Batch {
    pub fn new(samples: ArrayD<f32>, indices: Vec<usize>) -> Self {
        Self { samples, indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Итерация по датасету батчами.
///
/// With shuffling and a seed, the permutation of epoch `e` is drawn from
/// `seed + e`, so every epoch differs but a run is reproducible.
///
/// ```rust,ignore
/// let loader = DataLoader::new(dataset).shuffle(true).seed(42);
/// for batch in loader.iter(32, epoch) {
///     println!("Batch size: {}", batch.len());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: InMemoryDataset,
    shuffle: bool,
    drop_last: bool,
    seed: Option<u64>,
}

impl DataLoader {
    pub fn new(dataset: InMemoryDataset) -> Self {
        Self {
            dataset,
            shuffle: false,
            drop_last: false,
            seed: None,
        }
    }

    /// Включает/выключает перемешивание данных.
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Отбрасывать ли последний неполный батч.
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn dataset(&self) -> &InMemoryDataset {
        &self.dataset
    }

    /// Итератор по батчам эпохи `epoch`.
    pub fn iter(&self, batch_size: usize, epoch: usize) -> DataLoaderIterator<'_> {
        let len = self.dataset.len();
        let batch_sampler = if self.shuffle {
            let sampler = match self.seed {
                Some(seed) => RandomSampler::with_seed(len, seed.wrapping_add(epoch as u64)),
                None => RandomSampler::new(len),
            };
            BatchSamplerEnum::Random(BatchSampler::new(sampler, batch_size.max(1), self.drop_last))
        } else {
            let sampler = SequentialSampler::new(len);
            BatchSamplerEnum::Sequential(BatchSampler::new(sampler, batch_size.max(1), self.drop_last))
        };
        DataLoaderIterator {
            dataset: &self.dataset,
            batch_sampler,
        }
    }
}

impl DataSource for DataLoader {
    fn sample_shape(&self) -> Vec<usize> {
        self.dataset.sample_shape()
    }

    fn num_batches(&self, batch_size: usize) -> usize {
        num_batches(self.dataset.len(), batch_size, self.drop_last)
    }

    fn iterate(&self, batch_size: usize, epoch: usize) -> Box<dyn Iterator<Item = Batch> + '_> {
        Box::new(self.iter(batch_size, epoch))
    }
}

enum BatchSamplerEnum {
    Sequential(BatchSampler<SequentialSampler>),
    Random(BatchSampler<RandomSampler>),
}

impl Iterator for BatchSamplerEnum {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            BatchSamplerEnum::Sequential(s) => s.next(),
            BatchSamplerEnum::Random(s) => s.next(),
        }
    }
}

pub struct DataLoaderIterator<'a> {
    dataset: &'a InMemoryDataset,
    batch_sampler: BatchSamplerEnum,
}

impl<'a> Iterator for DataLoaderIterator<'a> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.batch_sampler.next()?;
        let samples = self.dataset.get_batch(&indices);
        Some(Batch::new(samples, indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn create_test_dataset() -> InMemoryDataset {
        let samples = ArrayD::from_shape_vec(IxDyn(&[10, 1, 4]), (0..40).map(|x| x as f32).collect()).unwrap();
        InMemoryDataset::new(samples).unwrap()
    }

    #[test]
    fn test_dataloader_basic() {
        let loader = DataLoader::new(create_test_dataset());

        assert_eq!(loader.num_batches(3), 4);
        let batches: Vec<_> = loader.iter(3, 0).collect();
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[0].samples.shape(), &[3, 1, 4]);
        assert_eq!(batches[3].len(), 1); // последний неполный батч
    }

    #[test]
    fn test_dataloader_drop_last() {
        let loader = DataLoader::new(create_test_dataset()).drop_last(true);
        assert_eq!(loader.num_batches(3), 3);
        assert_eq!(loader.iterate(3, 0).count(), 3);
    }

    #[test]
    fn test_shuffle_is_reseeded_per_epoch() {
        let loader = DataLoader::new(create_test_dataset()).shuffle(true).seed(42);

        let first: Vec<usize> = loader.iter(10, 0).next().unwrap().indices;
        let again: Vec<usize> = loader.iter(10, 0).next().unwrap().indices;
        let other: Vec<usize> = loader.iter(10, 1).next().unwrap().indices;

        assert_eq!(first, again);
        assert_ne!(first, other);
    }
}
