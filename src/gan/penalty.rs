//! Gradient penalty of WGAN-GP.
//!
//! For a critic `D`, a real batch `x` and a generated batch `x̃`:
//!
//! ```text
//! x̂  = α·x + (1 - α)·x̃          α ~ U[0, 1], one per sample
//! GP = mean_i (‖∇x̂ D(x̂)_i‖₂ - 1)²
//! ```
//!
//! The gradient `∇x̂ D(x̂)` is itself part of the graph, so differentiating
//! the critic loss with respect to the critic parameters goes through it.

use super::error::{GanError, GanResult};
use crate::asg::Value;
use crate::autograd::{grad, AutogradResult};
use crate::nn::Network;
use crate::runtime::backend::Backend;
use crate::runtime::cpu_backend::CpuBackend;
use crate::runtime::session::Executable;
use crate::tensor::{GraphContext, Tensor};
use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

const REAL: &str = "penalty.real";
const FAKE: &str = "penalty.fake";
const ALPHA: &str = "penalty.alpha";

/// `alpha·real + (1 - alpha)·fake`, with `alpha` broadcast over the
/// non-batch axes.
pub fn interpolate(real: &Tensor, fake: &Tensor, alpha: &Tensor) -> Tensor {
    let one = Tensor::scalar(&real.context, 1.0);
    let real_part = alpha * real;
    let fake_part = &(&one - alpha) * fake;
    &real_part + &fake_part
}

/// Adds the gradient penalty of `critic` to the graph and returns the
/// scalar penalty node.
///
/// A per-sample gradient norm of zero (a critic that ignores its input)
/// contributes exactly 1.
pub fn gradient_penalty<D: Network + ?Sized>(
    critic: &D,
    real: &Tensor,
    fake: &Tensor,
    alpha: &Tensor,
) -> AutogradResult<Tensor> {
    let interpolates = interpolate(real, fake, alpha);
    let scores = critic.forward(&interpolates);
    let gradients = grad(&scores, &[&interpolates])?.remove(0);

    let norms = gradients.flatten().square().sum_axis(1).sqrt();
    let one = Tensor::scalar(&real.context, 1.0);
    Ok((&norms - &one).square().mean())
}

/// `α` of shape `[batch, 1, ..., 1]` (same rank as the samples) drawn from
/// `U[0, 1]`.
pub fn sample_alpha(rng: &mut StdRng, batch: usize, rank: usize) -> ArrayD<f32> {
    let mut shape = vec![1; rank.max(1)];
    shape[0] = batch;
    ArrayD::random_using(IxDyn(&shape), Uniform::new_inclusive(0.0f32, 1.0), rng)
}

/// Evaluates the penalty eagerly on concrete batches.
///
/// Each call builds a fresh graph; use it for inspection and tests, the
/// trainer keeps the penalty inside its own critic graph.
pub struct PenaltyEvaluator<B: Backend = CpuBackend> {
    backend: B,
    rng: StdRng,
}

impl PenaltyEvaluator<CpuBackend> {
    pub fn new(seed: u64) -> Self {
        Self::with_backend(CpuBackend::new(), seed)
    }
}

impl<B: Backend> PenaltyEvaluator<B> {
    pub fn with_backend(backend: B, seed: u64) -> Self {
        Self {
            backend,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Penalty with a freshly drawn `α`.
    pub fn evaluate<D: Network + ?Sized>(
        &mut self,
        critic: &D,
        real: &ArrayD<f32>,
        fake: &ArrayD<f32>,
    ) -> GanResult<f32> {
        check_batches(real, fake)?;
        let alpha = sample_alpha(&mut self.rng, real.shape()[0], real.ndim());
        self.evaluate_with_alpha(critic, real, fake, &alpha)
    }

    pub fn evaluate_with_alpha<D: Network + ?Sized>(
        &self,
        critic: &D,
        real: &ArrayD<f32>,
        fake: &ArrayD<f32>,
        alpha: &ArrayD<f32>,
    ) -> GanResult<f32> {
        check_batches(real, fake)?;
        check_alpha(real, alpha)?;

        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let (real_t, fake_t, alpha_t) = inputs(&ctx);
        let penalty = gradient_penalty(critic, &real_t, &fake_t, &alpha_t)?;

        let values = self.run(&ctx, &penalty, critic.parameters(), real, fake, alpha)?;
        scalar(&values[0], "gradient penalty")
    }

    /// The interpolated batch `x̂` itself.
    pub fn interpolate(
        &self,
        real: &ArrayD<f32>,
        fake: &ArrayD<f32>,
        alpha: &ArrayD<f32>,
    ) -> GanResult<ArrayD<f32>> {
        check_batches(real, fake)?;
        check_alpha(real, alpha)?;

        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let (real_t, fake_t, alpha_t) = inputs(&ctx);
        let mixed = interpolate(&real_t, &fake_t, &alpha_t);

        let values = self.run(&ctx, &mixed, &HashMap::new(), real, fake, alpha)?;
        Ok(values[0].to_tensor())
    }

    fn run(
        &self,
        ctx: &Rc<RefCell<GraphContext>>,
        output: &Tensor,
        parameters: &HashMap<String, Value>,
        real: &ArrayD<f32>,
        fake: &ArrayD<f32>,
        alpha: &ArrayD<f32>,
    ) -> GanResult<Vec<Value>> {
        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_output(output.node_id);

        let feeds = HashMap::from([
            (REAL.to_string(), Value::Tensor(real.clone())),
            (FAKE.to_string(), Value::Tensor(fake.clone())),
            (ALPHA.to_string(), Value::Tensor(alpha.clone())),
        ]);
        Ok(Executable::new(graph).run(&self.backend, &[parameters, &feeds])?)
    }
}

fn inputs(ctx: &Rc<RefCell<GraphContext>>) -> (Tensor, Tensor, Tensor) {
    (
        Tensor::new_input(ctx, REAL),
        Tensor::new_input(ctx, FAKE),
        Tensor::new_input(ctx, ALPHA),
    )
}

fn check_batches(real: &ArrayD<f32>, fake: &ArrayD<f32>) -> GanResult<()> {
    if real.shape() != fake.shape() || real.ndim() == 0 || real.shape()[0] == 0 {
        return Err(GanError::ShapeMismatch {
            context: "gradient penalty (real vs fake)".to_string(),
            expected: real.shape().to_vec(),
            actual: fake.shape().to_vec(),
        });
    }
    Ok(())
}

/// `α` must be `[batch, 1, ..., 1]` with the rank of the samples.
fn check_alpha(real: &ArrayD<f32>, alpha: &ArrayD<f32>) -> GanResult<()> {
    let mut expected = vec![1; real.ndim()];
    expected[0] = real.shape()[0];
    if alpha.shape() != expected.as_slice() {
        return Err(GanError::ShapeMismatch {
            context: "gradient penalty (alpha)".to_string(),
            expected,
            actual: alpha.shape().to_vec(),
        });
    }
    Ok(())
}

pub(crate) fn scalar(value: &Value, what: &str) -> GanResult<f32> {
    value.as_scalar().ok_or_else(|| GanError::ShapeMismatch {
        context: what.to_string(),
        expected: Vec::new(),
        actual: value.shape(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_alpha_shape_and_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let alpha = sample_alpha(&mut rng, 5, 4);
        assert_eq!(alpha.shape(), &[5, 1, 1, 1]);
        assert!(alpha.iter().all(|a| (0.0..=1.0).contains(a)));
    }

    #[test]
    fn test_interpolate_mixes_per_sample() {
        let evaluator = PenaltyEvaluator::new(0);
        let real = array![[1.0f32, 2.0], [3.0, 4.0]].into_dyn();
        let fake = array![[-1.0f32, -2.0], [-3.0, -4.0]].into_dyn();
        let alpha = array![[0.5f32], [1.0]].into_dyn();

        let mixed = evaluator.interpolate(&real, &fake, &alpha).unwrap();
        assert_eq!(mixed, array![[0.0f32, 0.0], [3.0, 4.0]].into_dyn());
    }

    #[test]
    fn test_bad_alpha_is_rejected() {
        let evaluator = PenaltyEvaluator::new(0);
        let real = ArrayD::zeros(IxDyn(&[2, 3]));
        let err = evaluator
            .interpolate(&real, &real, &ArrayD::zeros(IxDyn(&[2, 3])))
            .unwrap_err();
        assert!(matches!(err, GanError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_scalar_rejects_tensors() {
        assert_abs_diff_eq!(scalar(&Value::ScalarF32(2.5), "x").unwrap(), 2.5);
        assert!(scalar(&Value::Tensor(ArrayD::zeros(IxDyn(&[2]))), "x").is_err());
    }
}
