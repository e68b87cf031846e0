//! # WGAN-GP
//!
//! Adversarial training of a generator against a critic with the
//! Wasserstein loss and a gradient penalty.
//!
//! - [`WganGpTrainer`]: the alternating training loop
//! - [`gradient_penalty`]: the penalty term, built with double backward
//! - [`MlpGenerator`], [`MlpCritic`]: ready-made networks
//! - [`ReportSink`]: where per-epoch losses and samples go
//!
//! ## Example
//!
//! ```ignore
//! use rustygan::gan::{LogSink, MlpCritic, MlpGenerator, TrainingConfig, WganGpTrainer};
//!
//! let generator = MlpGenerator::new("generator", 100, &[1, 16, 76], &net, &mut rng);
//! let critic = MlpCritic::new("critic", &[1, 16, 76], &net, &mut rng);
//! let og = Adam::new(2e-4, generator.parameters());
//! let od = Adam::new(2e-4, critic.parameters());
//!
//! let mut trainer = WganGpTrainer::new(config, generator, critic, og, od, CpuBackend::new())?;
//! let history = trainer.train(&loader, &mut LogSink)?;
//! ```

pub mod config;
pub mod error;
pub mod history;
pub mod networks;
pub mod penalty;
pub mod report;
pub mod trainer;

pub use config::{ConfigError, ExperimentConfig, LossSampling, NetworkConfig, OptimizerConfig, TrainingConfig};
pub use error::{GanError, GanResult};
pub use history::{EpochLosses, TrainingHistory};
pub use networks::{MlpCritic, MlpGenerator};
pub use penalty::{gradient_penalty, interpolate, sample_alpha, PenaltyEvaluator};
pub use report::{EpochReport, LogSink, MemorySink, ReportSink, SampleBatch, SinkError, Tee};
pub use trainer::{CriticStep, GeneratorStep, WganGpTrainer};
