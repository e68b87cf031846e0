//! # Data Loading Module
//!
//! Dataset / DataLoader API feeding real batches to the trainer.
//!
//! - [`InMemoryDataset`]: samples `[num_samples, ...]` held in memory
//! - [`DataLoader`]: batched iteration with optional seeded shuffling
//! - [`Sampler`]: index strategies (sequential, random)
//! - [`Normalize`]: `(x - mean) / std`
//! - [`DataSource`]: what the trainer consumes
//! - [`synthetic::sinusoids`]: generated data for smoke runs
//!
//! ## Example
//!
//! ```ignore
//! use rustygan::data::{DataLoader, InMemoryDataset};
//!
//! let dataset = InMemoryDataset::new(images)?;
//! let loader = DataLoader::new(dataset).shuffle(true).seed(42);
//!
//! for batch in loader.iter(32, epoch) {
//!     // train on batch.samples
//! }
//! ```

pub mod dataloader;
pub mod dataset;
pub mod sampler;
pub mod source;
pub mod synthetic;
pub mod transforms;

pub use dataloader::{Batch, DataLoader};
pub use dataset::{DataError, Dataset, InMemoryDataset};
pub use sampler::{BatchSampler, RandomSampler, Sampler, SequentialSampler};
pub use source::DataSource;
pub use transforms::{Normalize, Transform};
