//! Gradient penalty on critics whose input gradient is known in closed form.

use approx::assert_abs_diff_eq;
use ndarray::{array, Array2, ArrayD, IxDyn};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustygan::asg::Value;
use rustygan::autograd::grad;
use rustygan::gan::{gradient_penalty, GanError, MlpCritic, NetworkConfig, PenaltyEvaluator};
use rustygan::nn::Network;
use rustygan::runtime::cpu_backend::CpuBackend;
use rustygan::runtime::session::Executable;
use rustygan::tensor::{GraphContext, Tensor};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Scores every sample 1 regardless of input: zero input gradient.
struct ConstantCritic {
    parameters: HashMap<String, Value>,
}

impl ConstantCritic {
    fn new() -> Self {
        Self {
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
        Tensor::scalar(&input.context, 1.0).broadcast_like(&per_sample)
    }

    fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.parameters
    }
}

/// `D(x) = flatten(x)·w`: the input gradient of every sample is `w`.
struct LinearCritic {
    parameters: HashMap<String, Value>,
}

impl LinearCritic {
    fn new(w: Vec<f32>) -> Self {
        let n = w.len();
        let w = Array2::from_shape_vec((n, 1), w).unwrap().into_dyn();
        Self {
            parameters: HashMap::from([("linear.w".to_string(), Value::Tensor(w))]),
        }
    }
}

impl Network for LinearCritic {
    fn name(&self) -> &str {
        "linear"
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        input.flatten().dot(&Tensor::new_parameter(&input.context, "linear.w"))
    }

    fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.parameters
    }
}

/// `D(x) = ‖x‖²` per sample: the input gradient is `2x`.
struct SquareCritic {
    parameters: HashMap<String, Value>,
}

impl Network for SquareCritic {
    fn name(&self) -> &str {
        "square"
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        input.flatten().square().sum_axis(1)
    }

    fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.parameters
    }
}

fn batch(shape: &[usize], value: f32) -> ArrayD<f32> {
    ArrayD::from_elem(IxDyn(shape), value)
}

#[test]
fn test_constant_critic_penalty_is_one() {
    let mut evaluator = PenaltyEvaluator::new(0);
    let real = batch(&[3, 1, 2, 4], 0.7);
    let fake = batch(&[3, 1, 2, 4], -0.2);

    let penalty = evaluator.evaluate(&ConstantCritic::new(), &real, &fake).unwrap();
    assert_abs_diff_eq!(penalty, 1.0, epsilon = 1e-6);
}

#[test]
fn test_unit_gradient_has_no_penalty() {
    let mut evaluator = PenaltyEvaluator::new(0);
    let critic = LinearCritic::new(vec![0.6, 0.0, 0.8, 0.0]);
    let real = batch(&[5, 1, 4], 1.0);
    let fake = batch(&[5, 1, 4], -3.0);

    let penalty = evaluator.evaluate(&critic, &real, &fake).unwrap();
    assert_abs_diff_eq!(penalty, 0.0, epsilon = 1e-6);
}

#[test]
fn test_alpha_selects_real_or_fake() {
    let evaluator = PenaltyEvaluator::new(0);
    let critic = SquareCritic {
        parameters: HashMap::new(),
    };
    // ‖∇‖ = 2‖x‖: 3 at the real batch, 1 at the fake batch, 2 halfway
    let real = array![[1.5f32, 0.0], [0.0, 1.5]].into_dyn();
    let fake = array![[0.5f32, 0.0], [0.0, 0.5]].into_dyn();

    let at_real = evaluator
        .evaluate_with_alpha(&critic, &real, &fake, &batch(&[2, 1], 1.0))
        .unwrap();
    let at_fake = evaluator
        .evaluate_with_alpha(&critic, &real, &fake, &batch(&[2, 1], 0.0))
        .unwrap();
    let halfway = evaluator
        .evaluate_with_alpha(&critic, &real, &fake, &batch(&[2, 1], 0.5))
        .unwrap();

    assert_abs_diff_eq!(at_real, 4.0, epsilon = 1e-5);
    assert_abs_diff_eq!(at_fake, 0.0, epsilon = 1e-5);
    assert_abs_diff_eq!(halfway, 1.0, epsilon = 1e-5);
}

#[test]
fn test_mismatched_batches_are_rejected() {
    let mut evaluator = PenaltyEvaluator::new(0);
    let err = evaluator
        .evaluate(&ConstantCritic::new(), &batch(&[2, 3], 0.0), &batch(&[2, 4], 0.0))
        .unwrap_err();
    assert!(matches!(err, GanError::ShapeMismatch { .. }));
}

#[test]
fn test_empty_batch_is_rejected() {
    let config = NetworkConfig {
        hidden: vec![4],
        negative_slope: 0.2,
    };
    let critic = MlpCritic::new("critic", &[1, 3], &config, &mut StdRng::seed_from_u64(0));
    let mut evaluator = PenaltyEvaluator::new(0);

    let err = evaluator
        .evaluate(&critic, &batch(&[0, 1, 3], 0.0), &batch(&[0, 1, 3], 0.0))
        .unwrap_err();
    assert!(matches!(err, GanError::ShapeMismatch { .. }));
}

#[test]
fn test_mlp_critic_penalty_is_finite() {
    let mut rng = StdRng::seed_from_u64(5);
    let config = NetworkConfig {
        hidden: vec![8, 8],
        negative_slope: 0.2,
    };
    let critic = MlpCritic::new("critic", &[1, 3, 4], &config, &mut rng);
    let mut evaluator = PenaltyEvaluator::new(11);

    let penalty = evaluator
        .evaluate(&critic, &batch(&[4, 1, 3, 4], 0.3), &batch(&[4, 1, 3, 4], -0.6))
        .unwrap();
    assert!(penalty.is_finite());
    assert!(penalty >= 0.0);
}

#[test]
fn test_penalty_is_differentiable_in_critic_parameters() {
    // GP = (‖w‖ - 1)², so dGP/dw = 2(‖w‖ - 1)·w/‖w‖ = [4, 0, 0] for w = [3, 0, 0]
    let critic = LinearCritic::new(vec![3.0, 0.0, 0.0]);
    let ctx = Rc::new(RefCell::new(GraphContext::new()));
    let real = Tensor::new_input(&ctx, "real");
    let fake = Tensor::new_input(&ctx, "fake");
    let alpha = Tensor::new_input(&ctx, "alpha");

    let penalty = gradient_penalty(&critic, &real, &fake, &alpha).unwrap();
    let w = Tensor::new_parameter(&ctx, "linear.w");
    let dw = grad(&penalty, &[&w]).unwrap().remove(0);

    let mut graph = ctx.borrow().main_graph().clone();
    graph.set_outputs(vec![penalty.node_id, dw.node_id]);
    let feeds = HashMap::from([
        ("real".to_string(), Value::Tensor(batch(&[2, 3], 1.0))),
        ("fake".to_string(), Value::Tensor(batch(&[2, 3], 0.0))),
        ("alpha".to_string(), Value::Tensor(batch(&[2, 1], 0.25))),
    ]);
    let values = Executable::new(graph)
        .run(&CpuBackend::new(), &[critic.parameters(), &feeds])
        .unwrap();

    assert_abs_diff_eq!(values[0].as_scalar().unwrap(), 4.0, epsilon = 1e-5);
    let dw = values[1].to_tensor();
    assert_eq!(dw.shape(), &[3, 1]);
    assert_abs_diff_eq!(dw[&[0, 0][..]], 4.0, epsilon = 1e-4);
    assert_abs_diff_eq!(dw[&[1, 0][..]], 0.0, epsilon = 1e-6);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_linear_penalty_depends_only_on_weight_norm(
        scale in 0.0f32..3.0,
        real in proptest::collection::vec(-2.0f32..2.0, 6),
        fake in proptest::collection::vec(-2.0f32..2.0, 6),
        seed in any::<u64>(),
    ) {
        let critic = LinearCritic::new(vec![0.0, scale, 0.0]);
        let real = ArrayD::from_shape_vec(IxDyn(&[2, 1, 3]), real).unwrap();
        let fake = ArrayD::from_shape_vec(IxDyn(&[2, 1, 3]), fake).unwrap();

        let penalty = PenaltyEvaluator::new(seed).evaluate(&critic, &real, &fake).unwrap();
        prop_assert!(penalty >= 0.0);
        prop_assert!((penalty - (scale - 1.0).powi(2)).abs() < 1e-4);
    }

    #[test]
    fn prop_mlp_penalty_is_finite_and_non_negative(
        critic_seed in any::<u64>(),
        alpha_seed in any::<u64>(),
        negative_slope in 0.0f32..0.5,
        real in proptest::collection::vec(-2.0f32..2.0, 6),
        fake in proptest::collection::vec(-2.0f32..2.0, 6),
    ) {
        let config = NetworkConfig {
            hidden: vec![5, 4],
            negative_slope,
        };
        let critic = MlpCritic::new("critic", &[1, 3], &config, &mut StdRng::seed_from_u64(critic_seed));
        let real = ArrayD::from_shape_vec(IxDyn(&[2, 1, 3]), real).unwrap();
        let fake = ArrayD::from_shape_vec(IxDyn(&[2, 1, 3]), fake).unwrap();

        let penalty = PenaltyEvaluator::new(alpha_seed).evaluate(&critic, &real, &fake).unwrap();
        prop_assert!(penalty.is_finite());
        prop_assert!(penalty >= 0.0);
    }
}
