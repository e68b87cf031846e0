//! Per-epoch loss record returned by training.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLosses {
    pub epoch: usize,
    pub critic_loss: f32,
    pub generator_loss: f32,
    /// Gradient penalty sampled the same way as the losses.
    pub penalty: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochLosses>,
    pub critic_steps: usize,
    pub generator_steps: usize,
}

impl TrainingHistory {
    pub fn critic_losses(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.critic_loss).collect()
    }

    pub fn generator_losses(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.generator_loss).collect()
    }

    pub fn last(&self) -> Option<&EpochLosses> {
        self.epochs.last()
    }

    /// Pretty-printed JSON, e.g. `losses.json`.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}
