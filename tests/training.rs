//! End-to-end behaviour of the WGAN-GP training loop.

use approx::assert_abs_diff_eq;
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustygan::asg::Value;
use rustygan::data::{Batch, DataLoader, DataSource, InMemoryDataset};
use rustygan::gan::{
    GanError, LossSampling, MemorySink, MlpCritic, MlpGenerator, NetworkConfig, TrainingConfig,
    WganGpTrainer,
};
use rustygan::nn::Network;
use rustygan::optimizers::{Adam, Optimizer, Sgd};
use rustygan::runtime::cpu_backend::CpuBackend;
use rustygan::tensor::Tensor;
use std::collections::HashMap;

const IMAGE: [usize; 2] = [1, 4];

/// Scores every sample with `value`, has no parameters.
struct ConstantCritic {
    value: f32,
    parameters: HashMap<String, Value>,
}

impl ConstantCritic {
    fn new(value: f32) -> Self {
        Self {
            value,
            parameters: HashMap::new(),
        }
    }
}

impl Network for ConstantCritic {
    fn name(&self) -> &str {
        "constant"
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        let per_sample = input.flatten().sum_axis(1);
        Tensor::scalar(&input.context, self.value).broadcast_like(&per_sample)
    }

    fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.parameters
    }
}

struct NoData;

impl DataSource for NoData {
    fn sample_shape(&self) -> Vec<usize> {
        IMAGE.to_vec()
    }

    fn num_batches(&self, _batch_size: usize) -> usize {
        0
    }

    fn iterate(&self, _batch_size: usize, _epoch: usize) -> Box<dyn Iterator<Item = Batch> + '_> {
        Box::new(std::iter::empty())
    }
}

fn net() -> NetworkConfig {
    NetworkConfig {
        hidden: vec![8],
        negative_slope: 0.2,
    }
}

fn config(num_epochs: usize) -> TrainingConfig {
    TrainingConfig {
        num_epochs,
        latent_dim: 4,
        lambda_gp: 10.0,
        n_critic: 5,
        batch_size: 2,
        saving_interval: 50,
        plotting: true,
        loss_sampling: LossSampling::LastBatch,
        seed: 3,
    }
}

fn loader(num_samples: usize, sample_shape: &[usize]) -> DataLoader {
    let mut shape = vec![num_samples];
    shape.extend_from_slice(sample_shape);
    let n = shape.iter().product::<usize>();
    let samples = ArrayD::from_shape_vec(
        IxDyn(&shape),
        (0..n).map(|i| ((i as f32) * 0.37).sin()).collect(),
    )
    .unwrap();
    DataLoader::new(InMemoryDataset::new(samples).unwrap())
        .shuffle(true)
        .seed(9)
}

fn generator(latent_dim: usize) -> MlpGenerator {
    MlpGenerator::new("generator", latent_dim, &IMAGE, &net(), &mut StdRng::seed_from_u64(1))
}

fn mlp_trainer(config: TrainingConfig) -> WganGpTrainer<MlpGenerator, MlpCritic, Adam, Adam> {
    let generator = generator(config.latent_dim);
    let critic = MlpCritic::new("critic", &IMAGE, &net(), &mut StdRng::seed_from_u64(2));
    let og = Adam::new(1e-3, generator.parameters());
    let od = Adam::new(1e-3, critic.parameters());
    WganGpTrainer::new(config, generator, critic, og, od, CpuBackend::new()).unwrap()
}

fn constant_trainer(config: TrainingConfig) -> WganGpTrainer<MlpGenerator, ConstantCritic, Adam, Sgd> {
    let generator = generator(config.latent_dim);
    let critic = ConstantCritic::new(1.0);
    let og = Adam::new(1e-3, generator.parameters());
    let od = Sgd::new(1e-3, critic.parameters());
    WganGpTrainer::new(config, generator, critic, og, od, CpuBackend::new()).unwrap()
}

#[test]
fn test_constant_critic_losses() {
    // -1 + 1 + λ·(0 - 1)² = λ for the critic, -1 for the generator
    let mut trainer = constant_trainer(config(1));
    let history = trainer.train(&loader(2, &IMAGE), &mut MemorySink::new()).unwrap();

    let epoch = history.last().unwrap();
    assert_abs_diff_eq!(epoch.critic_loss, 10.0, epsilon = 1e-5);
    assert_abs_diff_eq!(epoch.generator_loss, -1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(epoch.penalty, 1.0, epsilon = 1e-6);
}

#[test]
fn test_step_counts() {
    let mut trainer = mlp_trainer(TrainingConfig {
        n_critic: 3,
        ..config(2)
    });
    // 5 samples in batches of 2: three batches, the last one short
    let history = trainer.train(&loader(5, &IMAGE), &mut MemorySink::new()).unwrap();

    assert_eq!(history.epochs.len(), 2);
    assert_eq!(history.critic_steps, 2 * 3 * 3);
    assert_eq!(history.generator_steps, 2 * 3);
    assert_eq!(trainer.critic_optimizer().step_count(), 2 * 3 * 3);
    assert_eq!(trainer.generator_optimizer().step_count(), 2 * 3);
    assert_eq!(trainer.critic_steps(), 18);
    assert_eq!(trainer.generator_steps(), 6);
    for (epoch, losses) in history.epochs.iter().enumerate() {
        assert_eq!(losses.epoch, epoch);
        assert!(losses.critic_loss.is_finite());
        assert!(losses.generator_loss.is_finite());
        assert!(losses.penalty >= 0.0);
    }
}

#[test]
fn test_reporting_schedule() {
    let mut sink = MemorySink::new();
    let mut trainer = constant_trainer(TrainingConfig {
        n_critic: 1,
        saving_interval: 2,
        ..config(5)
    });
    trainer.train(&loader(4, &IMAGE), &mut sink).unwrap();

    assert_eq!(sink.reported_epochs(), vec![0, 2, 4]);
    assert!(sink.reports.iter().all(|r| r.num_epochs == 5));
    assert_eq!(sink.samples.len(), 3);
    for samples in &sink.samples {
        assert_eq!(samples.fake.shape(), &[2, 1, 4]);
        assert_eq!(samples.real.shape(), &[2, 1, 4]);
    }
}

#[test]
fn test_single_epoch_is_reported_without_plots() {
    let mut sink = MemorySink::new();
    let mut trainer = constant_trainer(TrainingConfig {
        n_critic: 1,
        plotting: false,
        ..config(1)
    });
    trainer.train(&loader(2, &IMAGE), &mut sink).unwrap();

    assert_eq!(sink.reported_epochs(), vec![0]);
    assert!(sink.samples.is_empty());
}

#[test]
fn test_runs_are_reproducible() {
    let run = || {
        let mut trainer = mlp_trainer(TrainingConfig {
            n_critic: 2,
            ..config(2)
        });
        let history = trainer.train(&loader(4, &IMAGE), &mut MemorySink::new()).unwrap();
        let (generator, critic) = trainer.into_networks();
        (history, generator.parameters().clone(), critic.parameters().clone())
    };
    assert_eq!(run(), run());
}

#[test]
fn test_epoch_mean_matches_last_batch_for_one_batch() {
    let train = |loss_sampling: LossSampling| {
        let mut trainer = mlp_trainer(TrainingConfig {
            n_critic: 2,
            loss_sampling,
            ..config(1)
        });
        trainer.train(&loader(2, &IMAGE), &mut MemorySink::new()).unwrap()
    };
    let last = train(LossSampling::LastBatch);
    let mean = train(LossSampling::EpochMean);
    assert_abs_diff_eq!(last.epochs[0].critic_loss, mean.epochs[0].critic_loss, epsilon = 1e-5);
    assert_abs_diff_eq!(last.epochs[0].generator_loss, mean.epochs[0].generator_loss, epsilon = 1e-5);
}

#[test]
fn test_invalid_config_is_rejected() {
    let generator = generator(4);
    let critic = ConstantCritic::new(1.0);
    let og = Adam::new(1e-3, generator.parameters());
    let od = Sgd::new(1e-3, critic.parameters());
    let bad = TrainingConfig {
        n_critic: 0,
        ..config(1)
    };

    let result = WganGpTrainer::new(bad, generator, critic, og, od, CpuBackend::new());
    assert!(matches!(result, Err(GanError::InvalidConfig(_))));
}

#[test]
fn test_empty_data_is_rejected() {
    let mut trainer = constant_trainer(config(1));
    let err = trainer.train(&NoData, &mut MemorySink::new()).unwrap_err();
    assert!(matches!(err, GanError::EmptyData(2)));
}

#[test]
fn test_shape_mismatch_fails_before_any_update() {
    let mut trainer = mlp_trainer(config(1));
    let critic_before = trainer.critic().parameters().clone();

    let err = trainer.train(&loader(4, &[1, 5]), &mut MemorySink::new()).unwrap_err();

    assert!(matches!(err, GanError::ShapeInference(_) | GanError::ShapeMismatch { .. }));
    assert_eq!(trainer.critic_steps(), 0);
    assert_eq!(trainer.critic().parameters(), &critic_before);
}

#[test]
fn test_nan_loss_stops_before_update() {
    let generator = generator(4);
    let generator_before = generator.parameters().clone();
    let critic = ConstantCritic::new(f32::NAN);
    let og = Adam::new(1e-3, generator.parameters());
    let od = Sgd::new(1e-3, critic.parameters());
    let mut trainer = WganGpTrainer::new(config(1), generator, critic, og, od, CpuBackend::new()).unwrap();

    let err = trainer.train(&loader(2, &IMAGE), &mut MemorySink::new()).unwrap_err();

    assert!(matches!(err, GanError::NumericalDivergence { phase: "critic", .. }));
    assert_eq!(trainer.critic_steps(), 0);
    assert_eq!(trainer.generator().parameters(), &generator_before);
}
