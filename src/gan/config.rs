//! Run configuration: training hyperparameters, optimizer and network
//! settings, loadable from JSON.

use crate::optimizers::adam::{DEFAULT_BETA1, DEFAULT_BETA2, DEFAULT_EPSILON, DEFAULT_LR};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Which losses end up in the per-epoch history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LossSampling {
    /// Losses of the last batch of the epoch.
    #[default]
    LastBatch,
    /// Mean over the epoch's batches, each batch contributing the losses
    /// of its final critic step and its generator step.
    EpochMean,
}

/// Гиперпараметры цикла обучения.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub num_epochs: usize,
    pub latent_dim: usize,
    pub lambda_gp: f32,
    /// Critic steps per generator step.
    pub n_critic: usize,
    pub batch_size: usize,
    pub saving_interval: usize,
    pub plotting: bool,
    pub loss_sampling: LossSampling,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_epochs: 200,
            latent_dim: 100,
            lambda_gp: 10.0,
            n_critic: 5,
            batch_size: 32,
            saving_interval: 50,
            plotting: true,
            loss_sampling: LossSampling::LastBatch,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("num_epochs", self.num_epochs),
            ("latent_dim", self.latent_dim),
            ("n_critic", self.n_critic),
            ("batch_size", self.batch_size),
            ("saving_interval", self.saving_interval),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        if !self.lambda_gp.is_finite() || self.lambda_gp < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "lambda_gp must be finite and non-negative, got {}",
                self.lambda_gp
            )));
        }
        Ok(())
    }
}

/// Adam hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LR,
            beta1: DEFAULT_BETA1,
            beta2: DEFAULT_BETA2,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = self.learning_rate > 0.0
            && (0.0..1.0).contains(&self.beta1)
            && (0.0..1.0).contains(&self.beta2)
            && self.epsilon > 0.0;
        if valid {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!("invalid optimizer settings {:?}", self)))
        }
    }
}

/// Widths of the hidden layers of an MLP network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub hidden: Vec<usize>,
    pub negative_slope: f32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hidden: vec![256, 256],
            negative_slope: 0.2,
        }
    }
}

/// Everything a run needs besides the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub training: TrainingConfig,
    /// Shape of one sample, e.g. `[1, 16, 76]`.
    pub image_shape: Vec<usize>,
    pub generator: NetworkConfig,
    pub critic: NetworkConfig,
    pub generator_optimizer: OptimizerConfig,
    pub critic_optimizer: OptimizerConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            training: TrainingConfig::default(),
            image_shape: vec![1, 16, 76],
            generator: NetworkConfig::default(),
            critic: NetworkConfig::default(),
            generator_optimizer: OptimizerConfig::default(),
            critic_optimizer: OptimizerConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Reads a JSON file; missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.training.validate()?;
        self.generator_optimizer.validate()?;
        self.critic_optimizer.validate()?;
        if self.image_shape.is_empty() || self.image_shape.contains(&0) {
            return Err(ConfigError::Invalid(format!(
                "image_shape must be non-empty with positive dimensions, got {:?}",
                self.image_shape
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ExperimentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.training.n_critic, 5);
        assert_eq!(config.image_shape, vec![1, 16, 76]);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad = [
            TrainingConfig { n_critic: 0, ..Default::default() },
            TrainingConfig { batch_size: 0, ..Default::default() },
            TrainingConfig { lambda_gp: -1.0, ..Default::default() },
            TrainingConfig { lambda_gp: f32::NAN, ..Default::default() },
            TrainingConfig { saving_interval: 0, ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))), "{:?}", config);
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "training": {{ "num_epochs": 3, "loss_sampling": "epoch_mean" }}, "image_shape": [1, 8] }}"#
        )
        .unwrap();

        let config = ExperimentConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.training.num_epochs, 3);
        assert_eq!(config.training.loss_sampling, LossSampling::EpochMean);
        assert_eq!(config.training.latent_dim, 100);
        assert_eq!(config.image_shape, vec![1, 8]);
    }
}
