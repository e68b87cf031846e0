//! Abstract batch source consumed by the trainer.

use super::dataloader::Batch;

/// A restartable, finite sequence of batches per epoch.
///
/// `num_batches` must equal the number of items `iterate` yields for the
/// same batch size.
pub trait DataSource {
    /// Shape of one sample, without the batch axis.
    fn sample_shape(&self) -> Vec<usize>;

    fn num_batches(&self, batch_size: usize) -> usize;

    /// Batches of epoch `epoch`. May reorder samples between epochs.
    fn iterate(&self, batch_size: usize, epoch: usize) -> Box<dyn Iterator<Item = Batch> + '_>;
}
