//! Командная строка: обучение WGAN-GP на safetensors-датасете или на
//! синтетических синусоидах.

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustygan::data::{synthetic, DataLoader, DataSource, InMemoryDataset, Normalize, Transform};
use rustygan::gan::{
    ExperimentConfig, LogSink, MlpCritic, MlpGenerator, OptimizerConfig, Tee, WganGpTrainer,
};
use rustygan::logging::init_tracing;
use rustygan::nn::Network;
use rustygan::optimizers::Adam;
use rustygan::runtime::cpu_backend::CpuBackend;
use rustygan::serialization::{load_tensor, save_checkpoint, GanCheckpoint};
use rustygan::visualize::{save_loss_plot, ImageGridSink};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

/// Аргументы командной строки
#[derive(Parser, Debug)]
#[command(author, version, about = "RustyGAN: WGAN-GP training", long_about = None)]
struct Args {
    /// JSON experiment config; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// safetensors file with the training samples `[N, ...]`
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Tensor name inside the data file
    #[arg(long, default_value = "images")]
    tensor: String,

    /// Map `[0, 1]` data onto `[-1, 1]`
    #[arg(long)]
    normalize: bool,

    /// Number of synthetic samples when no data file is given
    #[arg(long, default_value_t = 256)]
    synthetic_samples: usize,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    latent_dim: Option<usize>,

    #[arg(long)]
    lambda_gp: Option<f32>,

    #[arg(long)]
    n_critic: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    saving_interval: Option<usize>,

    /// Do not write sample grids or the loss plot
    #[arg(long)]
    no_plot: bool,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,
}

impl Args {
    fn experiment(&self) -> Result<ExperimentConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_json_file(path)?,
            None => ExperimentConfig::default(),
        };
        let training = &mut config.training;
        if let Some(v) = self.epochs {
            training.num_epochs = v;
        }
        if let Some(v) = self.latent_dim {
            training.latent_dim = v;
        }
        if let Some(v) = self.lambda_gp {
            training.lambda_gp = v;
        }
        if let Some(v) = self.n_critic {
            training.n_critic = v;
        }
        if let Some(v) = self.batch_size {
            training.batch_size = v;
        }
        if let Some(v) = self.saving_interval {
            training.saving_interval = v;
        }
        if let Some(v) = self.seed {
            training.seed = v;
        }
        if self.no_plot {
            training.plotting = false;
        }
        Ok(config)
    }
}

fn adam(config: &OptimizerConfig, parameters: &HashMap<String, rustygan::asg::Value>) -> Adam {
    Adam::with_betas(config.learning_rate, config.beta1, config.beta2, config.epsilon, parameters)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args.log)?;

    let mut experiment = args.experiment()?;
    let seed = experiment.training.seed;
    let mut rng = StdRng::seed_from_u64(seed);

    // ---------- 1. Данные ----------
    let samples = match &args.data {
        Some(path) => {
            let samples = load_tensor(path, &args.tensor)?.into_tensor();
            info!(path = %path.display(), shape = ?samples.shape(), "dataset loaded");
            samples
        }
        None => {
            info!(samples = args.synthetic_samples, shape = ?experiment.image_shape, "using synthetic sinusoids");
            synthetic::sinusoids(args.synthetic_samples, &experiment.image_shape, &mut rng)
        }
    };
    let samples = if args.normalize {
        Normalize::to_symmetric_unit().apply(samples)
    } else {
        samples
    };
    let loader = DataLoader::new(InMemoryDataset::new(samples)?).shuffle(true).seed(seed);
    experiment.image_shape = loader.sample_shape();
    experiment.validate()?;

    // ---------- 2. Модели ----------
    let training = experiment.training.clone();
    let generator = MlpGenerator::new(
        "generator",
        training.latent_dim,
        &experiment.image_shape,
        &experiment.generator,
        &mut rng,
    );
    let critic = MlpCritic::new("critic", &experiment.image_shape, &experiment.critic, &mut rng);
    let generator_optimizer = adam(&experiment.generator_optimizer, generator.parameters());
    let critic_optimizer = adam(&experiment.critic_optimizer, critic.parameters());

    // ---------- 3. Обучение ----------
    let mut trainer = WganGpTrainer::new(
        training.clone(),
        generator,
        critic,
        generator_optimizer,
        critic_optimizer,
        CpuBackend::new(),
    )?;
    let mut sink = Tee(LogSink, ImageGridSink::new(&args.output_dir)?);
    let history = trainer.train(&loader, &mut sink)?;

    // ---------- 4. Результаты ----------
    history.save_json(args.output_dir.join("losses.json"))?;
    if training.plotting {
        save_loss_plot(&history, args.output_dir.join("losses.png"))?;
    }

    let (generator, critic) = trainer.into_networks();
    let checkpoint = GanCheckpoint::new(
        experiment,
        history,
        generator.parameters().clone(),
        critic.parameters().clone(),
    );
    let checkpoint_dir = args.output_dir.join("checkpoint");
    save_checkpoint(&checkpoint_dir, &checkpoint)?;
    info!(dir = %args.output_dir.display(), "results saved");
    Ok(())
}
