//! MLP generator and critic.
//!
//! Both are stacks of `Linear` layers with LeakyReLU between them. Layer
//! `i` owns the parameters `"{name}.fc{i}.weights"` and
//! `"{name}.fc{i}.bias"`.

use super::config::NetworkConfig;
use crate::asg::Value;
use crate::nn::{LeakyReLU, Linear, Module, Network, Tanh};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use std::collections::HashMap;

/// Layer widths `[input, hidden.., output]`.
struct Mlp {
    widths: Vec<usize>,
    negative_slope: f32,
}

impl Mlp {
    fn new(input: usize, config: &NetworkConfig, output: usize) -> Self {
        let mut widths = Vec::with_capacity(config.hidden.len() + 2);
        widths.push(input);
        widths.extend(config.hidden.iter().copied());
        widths.push(output);
        Self {
            widths,
            negative_slope: config.negative_slope,
        }
    }

    fn init(&self, name: &str, rng: &mut StdRng) -> HashMap<String, Value> {
        self.widths
            .windows(2)
            .enumerate()
            .flat_map(|(i, w)| Linear::init_values(&layer_name(name, i), w[0], w[1], rng))
            .collect()
    }

    /// Every layer but the last is followed by LeakyReLU.
    fn forward(&self, name: &str, input: &Tensor) -> Tensor {
        let activation = LeakyReLU::new(self.negative_slope);
        let last = self.widths.len() - 2;
        let mut h = input.clone();
        for (i, w) in self.widths.windows(2).enumerate() {
            let layer = Linear::new(&input.context, w[0], w[1], &layer_name(name, i));
            h = layer.forward(&h);
            if i < last {
                h = activation.forward(&h);
            }
        }
        h
    }
}

fn layer_name(name: &str, index: usize) -> String {
    format!("{}.fc{}", name, index)
}

/// Генератор: `z [N, latent] -> tanh(MLP(z)) -> [N, ...image_shape]`.
pub struct MlpGenerator {
    name: String,
    latent_dim: usize,
    image_shape: Vec<usize>,
    mlp: Mlp,
    parameters: HashMap<String, Value>,
}

impl MlpGenerator {
    pub fn new(
        name: &str,
        latent_dim: usize,
        image_shape: &[usize],
        config: &NetworkConfig,
        rng: &mut StdRng,
    ) -> Self {
        let mlp = Mlp::new(latent_dim, config, image_shape.iter().product());
        let parameters = mlp.init(name, rng);
        Self {
            name: name.to_string(),
            latent_dim,
            image_shape: image_shape.to_vec(),
            mlp,
            parameters,
        }
    }

    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    pub fn image_shape(&self) -> &[usize] {
        &self.image_shape
    }
}

impl Network for MlpGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, noise: &Tensor) -> Tensor {
        let flat = self.mlp.forward(&self.name, noise);
        Tanh::new().forward(&flat).unflatten(&self.image_shape)
    }

    fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.parameters
    }
}

/// Критик: `[N, ...image_shape] -> flatten -> MLP -> [N, 1]`, no output
/// activation.
pub struct MlpCritic {
    name: String,
    input_shape: Vec<usize>,
    mlp: Mlp,
    parameters: HashMap<String, Value>,
}

impl MlpCritic {
    pub fn new(name: &str, input_shape: &[usize], config: &NetworkConfig, rng: &mut StdRng) -> Self {
        let mlp = Mlp::new(input_shape.iter().product(), config, 1);
        let parameters = mlp.init(name, rng);
        Self {
            name: name.to_string(),
            input_shape: input_shape.to_vec(),
            mlp,
            parameters,
        }
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }
}

impl Network for MlpCritic {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, input: &Tensor) -> Tensor {
        self.mlp.forward(&self.name, &input.flatten())
    }

    fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::cpu_backend::CpuBackend;
    use crate::runtime::session::Executable;
    use crate::tensor::GraphContext;
    use ndarray::{ArrayD, IxDyn};
    use rand::SeedableRng;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn small_config() -> NetworkConfig {
        NetworkConfig {
            hidden: vec![8],
            negative_slope: 0.2,
        }
    }

    #[test]
    fn test_generator_output_shape_and_range() {
        let mut rng = StdRng::seed_from_u64(0);
        let generator = MlpGenerator::new("generator", 4, &[2, 3, 5], &small_config(), &mut rng);
        assert_eq!(generator.parameters().len(), 4);
        assert_eq!(generator.num_parameters(), 4 * 8 + 8 + 8 * 30 + 30);

        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let z = Tensor::new_input(&ctx, "noise");
        let out = generator.forward(&z);
        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_output(out.node_id);

        let feeds = HashMap::from([(
            "noise".to_string(),
            Value::Tensor(ArrayD::from_elem(IxDyn(&[3, 4]), 0.5)),
        )]);
        let values = Executable::new(graph)
            .run(&CpuBackend::new(), &[generator.parameters(), &feeds])
            .unwrap();
        let images = values[0].to_tensor();
        assert_eq!(images.shape(), &[3, 2, 3, 5]);
        assert!(images.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_critic_scores_per_sample() {
        let mut rng = StdRng::seed_from_u64(0);
        let critic = MlpCritic::new("critic", &[1, 4, 4], &small_config(), &mut rng);

        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let scores = critic.forward(&x);
        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_output(scores.node_id);
        let exe = Executable::new(graph);

        let mut shapes: HashMap<String, Vec<usize>> =
            critic.parameters().iter().map(|(k, v)| (k.clone(), v.shape())).collect();
        shapes.insert("x".to_string(), vec![6, 1, 4, 4]);
        let annotated = exe.infer_shapes(&shapes).unwrap();
        assert_eq!(annotated.get_node(scores.node_id).unwrap().shape, Some(vec![6, 1]));
    }

    #[test]
    fn test_forward_twice_shares_parameters() {
        let mut rng = StdRng::seed_from_u64(0);
        let critic = MlpCritic::new("critic", &[3], &small_config(), &mut rng);

        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let a = Tensor::new_input(&ctx, "a");
        let b = Tensor::new_input(&ctx, "b");
        critic.forward(&a);
        let nodes_after_first = ctx.borrow().main_graph().len();
        critic.forward(&b);
        let added = ctx.borrow().main_graph().len() - nodes_after_first;

        // flatten + 2 x (matmul, add) + leaky relu, no new parameter nodes
        assert!(added < 10);
        assert!(ctx.borrow().parameter_node("critic.fc1.weights").is_some());
    }
}
