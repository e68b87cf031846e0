//! Полносвязный (линейный) слой в графовой парадигме.

use crate::asg::Value;
use crate::nn::module::Module;
use crate::tensor::{GraphContext, Tensor};
use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::rc::Rc;

/// Полносвязный (линейный) слой.
///
/// Слой не хранит реальных данных: он владеет символьными `Tensor`-дескрипторами
/// весов (`weights`, `[in, out]`) и смещений (`bias`, `[out]`), которые являются
/// узлами `Parameter` в ASG. Значения передаются при выполнении графа по именам
/// `"{name}.weights"` и `"{name}.bias"`.
pub struct Linear {
    pub weights: Tensor,
    pub bias: Tensor,
    pub in_features: usize,
    pub out_features: usize,
}

impl Linear {
    /// Регистрирует параметры слоя в графе. Вызов с тем же `name` в том же
    /// контексте возвращает те же узлы-параметры.
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        in_features: usize,
        out_features: usize,
        name: &str,
    ) -> Self {
        let weights = Tensor::new_parameter(context, &format!("{}.weights", name));
        let bias = Tensor::new_parameter(context, &format!("{}.bias", name));
        Self {
            weights,
            bias,
            in_features,
            out_features,
        }
    }

    /// Начальные значения параметров слоя: веса и смещения из
    /// `U(-1/√in, 1/√in)`.
    pub fn init_values(
        name: &str,
        in_features: usize,
        out_features: usize,
        rng: &mut StdRng,
    ) -> Vec<(String, Value)> {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        let weights = Array2::<f32>::random_using((in_features, out_features), dist, rng);
        let bias = Array1::<f32>::random_using(out_features, dist, rng);
        vec![
            (format!("{}.weights", name), Value::Tensor(weights.into_dyn())),
            (format!("{}.bias", name), Value::Tensor(bias.into_dyn())),
        ]
    }
}

impl Module for Linear {
    /// `inputs.dot(weights) + bias`
    fn forward(&self, inputs: &Tensor) -> Tensor {
        let dot_product = inputs.dot(&self.weights);
        &dot_product + &self.bias
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weights.clone(), self.bias.clone()]
    }
}
