//! Цикл обучения WGAN-GP.
//!
//! Per batch: `n_critic` critic updates on the same real batch (each with
//! fresh noise and fresh `α`), then one generator update. The two update
//! graphs are built once, in `new`, and executed with new feeds on every
//! step:
//!
//! - critic graph: inputs `real`, `noise`, `alpha`; the generator output is
//!   wrapped in `StopGradient`, and only critic gradients are requested, so
//!   a critic step never touches the generator;
//! - generator graph: input `noise`; only generator gradients are
//!   requested, so a generator step never touches the critic.

use super::config::{ConfigError, LossSampling, TrainingConfig};
use super::error::{GanError, GanResult};
use super::history::{EpochLosses, TrainingHistory};
use super::penalty::{gradient_penalty, sample_alpha, scalar};
use super::report::{EpochReport, ReportSink, SampleBatch};
use crate::asg::{NodeId, Shape, Value};
use crate::autograd::grad;
use crate::data::DataSource;
use crate::losses::{critic_loss, generator_loss};
use crate::metrics::RunningMean;
use crate::nn::Network;
use crate::optimizers::Optimizer;
use crate::runtime::backend::Backend;
use crate::runtime::cpu_backend::CpuBackend;
use crate::runtime::session::Executable;
use crate::tensor::{GraphContext, Tensor};
use ndarray::{Array2, ArrayD};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tracing::{debug, info, warn};

const REAL: &str = "real";
const NOISE: &str = "noise";
const ALPHA: &str = "alpha";

/// Result of one critic update.
#[derive(Debug, Clone)]
pub struct CriticStep {
    pub loss: f32,
    pub penalty: f32,
    /// Generated batch the update was computed on.
    pub fake: ArrayD<f32>,
}

/// Result of one generator update.
#[derive(Debug, Clone)]
pub struct GeneratorStep {
    pub loss: f32,
    pub fake: ArrayD<f32>,
}

/// A compiled update graph.
///
/// Outputs are `[loss, <extras>.., gradients..]`, gradients in the order of
/// `parameter_names`.
struct StepGraph {
    executable: Executable,
    parameter_names: Vec<String>,
    /// Node of the generated batch (for shape checks).
    fake_node: NodeId,
    num_extras: usize,
}

impl StepGraph {
    fn gradients(&self, outputs: Vec<Value>) -> HashMap<String, Value> {
        self.parameter_names
            .iter()
            .cloned()
            .zip(outputs.into_iter().skip(1 + self.num_extras))
            .collect()
    }
}

fn sorted_names(parameters: &HashMap<String, Value>) -> Vec<String> {
    let mut names: Vec<String> = parameters.keys().cloned().collect();
    names.sort();
    names
}

fn finalize(
    ctx: &Rc<RefCell<GraphContext>>,
    loss: &Tensor,
    extras: &[&Tensor],
    parameter_names: Vec<String>,
    fake_node: NodeId,
) -> GanResult<StepGraph> {
    let parameters: Vec<Tensor> = parameter_names
        .iter()
        .map(|name| Tensor::new_parameter(ctx, name))
        .collect();
    let wrt: Vec<&Tensor> = parameters.iter().collect();
    let gradients = grad(loss, &wrt)?;

    let mut outputs = vec![loss.node_id];
    outputs.extend(extras.iter().map(|t| t.node_id));
    outputs.extend(gradients.iter().map(|t| t.node_id));

    let mut graph = ctx.borrow().main_graph().clone();
    graph.set_outputs(outputs);
    Ok(StepGraph {
        executable: Executable::new(graph),
        parameter_names,
        fake_node,
        num_extras: extras.len(),
    })
}

/// Outputs: `[loss, penalty, fake, critic gradients..]`.
fn build_critic_graph<G: Network, D: Network>(
    generator: &G,
    critic: &D,
    lambda_gp: f32,
) -> GanResult<StepGraph> {
    let ctx = Rc::new(RefCell::new(GraphContext::new()));
    let real = Tensor::new_input(&ctx, REAL);
    let noise = Tensor::new_input(&ctx, NOISE);
    let alpha = Tensor::new_input(&ctx, ALPHA);

    let fake = generator.forward(&noise).stop_gradient();
    let real_scores = critic.forward(&real);
    let fake_scores = critic.forward(&fake);
    let penalty = gradient_penalty(critic, &real, &fake, &alpha)?;
    let loss = critic_loss(&real_scores, &fake_scores, &penalty, lambda_gp);

    finalize(&ctx, &loss, &[&penalty, &fake], sorted_names(critic.parameters()), fake.node_id)
}

/// Outputs: `[loss, fake, generator gradients..]`.
fn build_generator_graph<G: Network, D: Network>(generator: &G, critic: &D) -> GanResult<StepGraph> {
    let ctx = Rc::new(RefCell::new(GraphContext::new()));
    let noise = Tensor::new_input(&ctx, NOISE);

    let fake = generator.forward(&noise);
    let loss = generator_loss(&critic.forward(&fake));

    finalize(&ctx, &loss, &[&fake], sorted_names(generator.parameters()), fake.node_id)
}

fn parameter_shapes(parameters: &HashMap<String, Value>) -> impl Iterator<Item = (String, Shape)> + '_ {
    parameters.iter().map(|(name, value)| (name.clone(), value.shape()))
}

/// Тренер WGAN-GP.
///
/// Owns both networks, their optimizers and the sampling RNG. With a fixed
/// `config.seed`, fixed initial parameters and a deterministic data source
/// a run is reproducible.
pub struct WganGpTrainer<G, D, OG, OD, B = CpuBackend>
where
    G: Network,
    D: Network,
    OG: Optimizer,
    OD: Optimizer,
    B: Backend,
{
    config: TrainingConfig,
    generator: G,
    critic: D,
    generator_optimizer: OG,
    critic_optimizer: OD,
    backend: B,
    rng: StdRng,
    critic_graph: StepGraph,
    generator_graph: StepGraph,
    checked_real_shapes: HashSet<Shape>,
    checked_generator_batches: HashSet<usize>,
    critic_steps: usize,
    generator_steps: usize,
}

impl<G, D, OG, OD, B> WganGpTrainer<G, D, OG, OD, B>
where
    G: Network,
    D: Network,
    OG: Optimizer,
    OD: Optimizer,
    B: Backend,
{
    pub fn new(
        config: TrainingConfig,
        generator: G,
        critic: D,
        generator_optimizer: OG,
        critic_optimizer: OD,
        backend: B,
    ) -> GanResult<Self> {
        config.validate()?;
        if generator.name() == critic.name() {
            return Err(ConfigError::Invalid(format!(
                "generator and critic share the parameter prefix '{}'",
                generator.name()
            ))
            .into());
        }

        let critic_graph = build_critic_graph(&generator, &critic, config.lambda_gp)?;
        let generator_graph = build_generator_graph(&generator, &critic)?;
        debug!(
            critic_nodes = critic_graph.executable.graph().len(),
            generator_nodes = generator_graph.executable.graph().len(),
            "update graphs built"
        );

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            generator,
            critic,
            generator_optimizer,
            critic_optimizer,
            backend,
            critic_graph,
            generator_graph,
            checked_real_shapes: HashSet::new(),
            checked_generator_batches: HashSet::new(),
            critic_steps: 0,
            generator_steps: 0,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn critic(&self) -> &D {
        &self.critic
    }

    pub fn generator_optimizer(&self) -> &OG {
        &self.generator_optimizer
    }

    pub fn critic_optimizer(&self) -> &OD {
        &self.critic_optimizer
    }

    pub fn critic_steps(&self) -> usize {
        self.critic_steps
    }

    pub fn generator_steps(&self) -> usize {
        self.generator_steps
    }

    pub fn into_networks(self) -> (G, D) {
        (self.generator, self.critic)
    }

    fn sample_noise(&mut self, batch: usize) -> ArrayD<f32> {
        Array2::<f32>::random_using((batch, self.config.latent_dim), StandardNormal, &mut self.rng).into_dyn()
    }

    fn network_shapes(&self) -> HashMap<String, Shape> {
        parameter_shapes(self.generator.parameters())
            .chain(parameter_shapes(self.critic.parameters()))
            .collect()
    }

    /// Shape-checks the critic graph for a real batch of `real_shape`: the
    /// generator must produce exactly that shape and the critic must accept
    /// it.
    fn check_real_shape(&mut self, real_shape: &[usize]) -> GanResult<()> {
        if self.checked_real_shapes.contains(real_shape) {
            return Ok(());
        }
        if real_shape.first().map_or(true, |&batch| batch == 0) {
            return Err(GanError::ShapeMismatch {
                context: "real batch".to_string(),
                expected: vec![self.config.batch_size],
                actual: real_shape.to_vec(),
            });
        }
        let batch = real_shape[0];
        let mut alpha_shape = vec![1; real_shape.len()];
        alpha_shape[0] = batch;

        let mut shapes = self.network_shapes();
        shapes.insert(REAL.to_string(), real_shape.to_vec());
        shapes.insert(NOISE.to_string(), vec![batch, self.config.latent_dim]);
        shapes.insert(ALPHA.to_string(), alpha_shape);

        // the penalty interpolates real and fake, so a generator/data
        // mismatch usually surfaces as a broadcast error here
        let annotated = self.critic_graph.executable.infer_shapes(&shapes)?;
        let fake_shape = annotated
            .get_node(self.critic_graph.fake_node)?
            .shape
            .clone()
            .unwrap_or_default();
        if fake_shape != real_shape {
            return Err(GanError::ShapeMismatch {
                context: "generator output vs real batch".to_string(),
                expected: real_shape.to_vec(),
                actual: fake_shape,
            });
        }

        self.checked_real_shapes.insert(real_shape.to_vec());
        Ok(())
    }

    fn check_generator_batch(&mut self, batch: usize) -> GanResult<()> {
        if self.checked_generator_batches.contains(&batch) {
            return Ok(());
        }
        let mut shapes = self.network_shapes();
        shapes.insert(NOISE.to_string(), vec![batch, self.config.latent_dim]);
        self.generator_graph.executable.infer_shapes(&shapes)?;
        self.checked_generator_batches.insert(batch);
        Ok(())
    }

    /// One critic update on `real` (`[N, ...sample_shape]`).
    pub fn critic_step(&mut self, real: &ArrayD<f32>) -> GanResult<CriticStep> {
        self.check_real_shape(real.shape())?;
        let batch = real.shape()[0];

        let noise = self.sample_noise(batch);
        let alpha = sample_alpha(&mut self.rng, batch, real.ndim());
        let feeds = HashMap::from([
            (REAL.to_string(), Value::Tensor(real.clone())),
            (NOISE.to_string(), Value::Tensor(noise)),
            (ALPHA.to_string(), Value::Tensor(alpha)),
        ]);

        let mut outputs = self.critic_graph.executable.run(
            &self.backend,
            &[self.generator.parameters(), self.critic.parameters(), &feeds],
        )?;
        let loss = scalar(&outputs[0], "critic loss")?;
        let penalty = scalar(&outputs[1], "gradient penalty")?;
        let fake = std::mem::replace(&mut outputs[2], Value::ScalarF32(0.0)).into_tensor();
        let gradients = self.critic_graph.gradients(outputs);

        ensure_finite("critic", "loss", loss)?;
        ensure_finite("critic", "gradient penalty", penalty)?;
        ensure_finite_gradients("critic", &gradients)?;

        self.critic_optimizer.zero_grad();
        self.critic_optimizer.accumulate(&gradients)?;
        self.critic_optimizer.step(self.critic.parameters_mut())?;
        self.critic_steps += 1;

        Ok(CriticStep { loss, penalty, fake })
    }

    /// One generator update on a fresh noise batch of `batch_size`.
    pub fn generator_step(&mut self, batch_size: usize) -> GanResult<GeneratorStep> {
        if batch_size == 0 {
            return Err(ConfigError::Invalid("generator batch size must be positive".to_string()).into());
        }
        self.check_generator_batch(batch_size)?;

        let noise = self.sample_noise(batch_size);
        let feeds = HashMap::from([(NOISE.to_string(), Value::Tensor(noise))]);

        let mut outputs = self.generator_graph.executable.run(
            &self.backend,
            &[self.generator.parameters(), self.critic.parameters(), &feeds],
        )?;
        let loss = scalar(&outputs[0], "generator loss")?;
        let fake = std::mem::replace(&mut outputs[1], Value::ScalarF32(0.0)).into_tensor();
        let gradients = self.generator_graph.gradients(outputs);

        ensure_finite("generator", "loss", loss)?;
        ensure_finite_gradients("generator", &gradients)?;

        self.generator_optimizer.zero_grad();
        self.generator_optimizer.accumulate(&gradients)?;
        self.generator_optimizer.step(self.generator.parameters_mut())?;
        self.generator_steps += 1;

        Ok(GeneratorStep { loss, fake })
    }

    /// Runs `config.num_epochs` epochs over `data`.
    ///
    /// Every epoch with `epoch % saving_interval == 0` is reported to
    /// `sink`; with `plotting` enabled the sink also receives that epoch's
    /// last critic-phase fake batch and last real batch.
    pub fn train(&mut self, data: &dyn DataSource, sink: &mut dyn ReportSink) -> GanResult<TrainingHistory> {
        let batch_size = self.config.batch_size;
        let num_batches = data.num_batches(batch_size);
        if num_batches == 0 {
            return Err(GanError::EmptyData(batch_size));
        }

        let mut full_shape = vec![batch_size];
        full_shape.extend(data.sample_shape());
        self.check_real_shape(&full_shape)?;

        info!(
            epochs = self.config.num_epochs,
            batches_per_epoch = num_batches,
            n_critic = self.config.n_critic,
            generator_parameters = self.generator.num_parameters(),
            critic_parameters = self.critic.num_parameters(),
            "starting WGAN-GP training"
        );

        let mut history = TrainingHistory::default();
        for epoch in 0..self.config.num_epochs {
            let (losses, samples) = self.run_epoch(data, epoch)?;
            history.epochs.push(losses);

            if epoch % self.config.saving_interval == 0 {
                sink.report(&EpochReport {
                    epoch,
                    num_epochs: self.config.num_epochs,
                    critic_loss: losses.critic_loss,
                    generator_loss: losses.generator_loss,
                })?;
                if self.config.plotting {
                    sink.samples(&samples)?;
                }
            }
        }

        history.critic_steps = self.critic_steps;
        history.generator_steps = self.generator_steps;
        info!(
            critic_steps = self.critic_steps,
            generator_steps = self.generator_steps,
            "training finished"
        );
        Ok(history)
    }

    fn run_epoch(&mut self, data: &dyn DataSource, epoch: usize) -> GanResult<(EpochLosses, SampleBatch)> {
        let batch_size = self.config.batch_size;
        let mut critic_mean = RunningMean::new();
        let mut generator_mean = RunningMean::new();
        let mut penalty_mean = RunningMean::new();
        let mut last: Option<(EpochLosses, SampleBatch)> = None;

        for (index, batch) in data.iterate(batch_size, epoch).enumerate() {
            if batch.is_empty() {
                continue;
            }
            if batch.len() < batch_size && epoch == 0 {
                warn!(batch = index, size = batch.len(), batch_size, "short batch");
            }

            let mut critic = self.critic_step(&batch.samples)?;
            for _ in 1..self.config.n_critic {
                critic = self.critic_step(&batch.samples)?;
            }
            let generator = self.generator_step(batch.len())?;
            debug!(
                epoch,
                batch = index,
                d_loss = critic.loss,
                g_loss = generator.loss,
                gp = critic.penalty,
                "batch done"
            );

            critic_mean.update(critic.loss as f64);
            generator_mean.update(generator.loss as f64);
            penalty_mean.update(critic.penalty as f64);
            last = Some((
                EpochLosses {
                    epoch,
                    critic_loss: critic.loss,
                    generator_loss: generator.loss,
                    penalty: critic.penalty,
                },
                SampleBatch {
                    epoch,
                    fake: critic.fake,
                    real: batch.samples,
                },
            ));
        }

        let (mut losses, samples) = last.ok_or(GanError::EmptyEpoch(epoch))?;
        if self.config.loss_sampling == LossSampling::EpochMean {
            if let (Some(d), Some(g), Some(gp)) =
                (critic_mean.compute(), generator_mean.compute(), penalty_mean.compute())
            {
                losses.critic_loss = d as f32;
                losses.generator_loss = g as f32;
                losses.penalty = gp as f32;
            }
        }
        Ok((losses, samples))
    }
}

fn ensure_finite(phase: &'static str, quantity: &str, value: f32) -> GanResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(GanError::NumericalDivergence {
            phase,
            quantity: quantity.to_string(),
            value,
        })
    }
}

fn ensure_finite_gradients(phase: &'static str, gradients: &HashMap<String, Value>) -> GanResult<()> {
    for (name, gradient) in gradients {
        let bad = match gradient {
            Value::ScalarF32(v) => (!v.is_finite()).then_some(*v),
            Value::Tensor(t) => t.iter().copied().find(|v| !v.is_finite()),
        };
        if let Some(value) = bad {
            return Err(GanError::NumericalDivergence {
                phase,
                quantity: format!("gradient of {}", name),
                value,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gan::config::NetworkConfig;
    use crate::gan::networks::{MlpCritic, MlpGenerator};
    use crate::optimizers::Adam;

    fn small_trainer(
        config: TrainingConfig,
        image_shape: &[usize],
    ) -> WganGpTrainer<MlpGenerator, MlpCritic, Adam, Adam> {
        let mut rng = StdRng::seed_from_u64(1);
        let net = NetworkConfig {
            hidden: vec![6],
            negative_slope: 0.2,
        };
        let generator = MlpGenerator::new("generator", config.latent_dim, image_shape, &net, &mut rng);
        let critic = MlpCritic::new("critic", image_shape, &net, &mut rng);
        let og = Adam::new(1e-3, generator.parameters());
        let od = Adam::new(1e-3, critic.parameters());
        WganGpTrainer::new(config, generator, critic, og, od, CpuBackend::new()).unwrap()
    }

    fn config() -> TrainingConfig {
        TrainingConfig {
            num_epochs: 1,
            latent_dim: 3,
            batch_size: 2,
            n_critic: 2,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_critic_step_only_moves_critic() {
        let mut trainer = small_trainer(config(), &[1, 4]);
        let generator_before = trainer.generator().parameters().clone();
        let critic_before = trainer.critic().parameters().clone();

        let real = ArrayD::from_elem(ndarray::IxDyn(&[2, 1, 4]), 0.5f32);
        let step = trainer.critic_step(&real).unwrap();

        assert!(step.loss.is_finite());
        assert!(step.penalty >= 0.0);
        assert_eq!(step.fake.shape(), &[2, 1, 4]);
        assert_eq!(trainer.generator().parameters(), &generator_before);
        assert_ne!(trainer.critic().parameters(), &critic_before);
        assert_eq!(trainer.critic_steps(), 1);
    }

    #[test]
    fn test_generator_step_only_moves_generator() {
        let mut trainer = small_trainer(config(), &[1, 4]);
        let generator_before = trainer.generator().parameters().clone();
        let critic_before = trainer.critic().parameters().clone();

        let step = trainer.generator_step(3).unwrap();

        assert_eq!(step.fake.shape(), &[3, 1, 4]);
        assert_eq!(trainer.critic().parameters(), &critic_before);
        assert_ne!(trainer.generator().parameters(), &generator_before);
        assert_eq!(trainer.generator_steps(), 1);
    }

    #[test]
    fn test_mismatched_real_batch_is_rejected_before_update() {
        let mut trainer = small_trainer(config(), &[1, 4]);
        let critic_before = trainer.critic().parameters().clone();

        let real = ArrayD::zeros(ndarray::IxDyn(&[2, 1, 5]));
        let err = trainer.critic_step(&real).unwrap_err();

        assert!(matches!(err, GanError::ShapeInference(_) | GanError::ShapeMismatch { .. }));
        assert_eq!(trainer.critic().parameters(), &critic_before);
        assert_eq!(trainer.critic_steps(), 0);
    }

    #[test]
    fn test_empty_real_batch_is_rejected_before_update() {
        let mut trainer = small_trainer(config(), &[1, 4]);
        let critic_before = trainer.critic().parameters().clone();

        let real = ArrayD::zeros(ndarray::IxDyn(&[0, 1, 4]));
        let err = trainer.critic_step(&real).unwrap_err();

        assert!(matches!(err, GanError::ShapeMismatch { .. }));
        assert_eq!(trainer.critic().parameters(), &critic_before);
        assert_eq!(trainer.critic_optimizer().step_count(), 0);
    }

    #[test]
    fn test_same_prefix_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let net = NetworkConfig::default();
        let generator = MlpGenerator::new("net", 2, &[2], &net, &mut rng);
        let critic = MlpCritic::new("net", &[2], &net, &mut rng);
        let og = Adam::new(1e-3, generator.parameters());
        let od = Adam::new(1e-3, critic.parameters());

        let result = WganGpTrainer::new(config(), generator, critic, og, od, CpuBackend::new());
        assert!(matches!(result, Err(GanError::InvalidConfig(_))));
    }
}
