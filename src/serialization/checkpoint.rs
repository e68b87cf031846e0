//! Чекпоинты обученной пары генератор/критик.
//!
//! ```text
//! checkpoint_dir/
//! ├── meta.json               # конфигурация эксперимента и история потерь
//! ├── generator.safetensors   # веса генератора
//! └── critic.safetensors      # веса критика
//! ```

use super::safetensors_io::{load_safetensors, save_safetensors, SafeTensorsError};
use crate::asg::Value;
use crate::gan::config::ExperimentConfig;
use crate::gan::history::TrainingHistory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CHECKPOINT_VERSION: &str = "1.0";

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Ошибка ввода/вывода: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Ошибка SafeTensors: {0}")]
    SafeTensorsError(#[from] SafeTensorsError),

    #[error("Ошибка JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Файл не найден: {0}")]
    FileNotFound(PathBuf),
}

type Result<T> = std::result::Result<T, CheckpointError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub version: String,
    pub experiment: ExperimentConfig,
    pub history: TrainingHistory,
}

#[derive(Debug, Clone)]
pub struct GanCheckpoint {
    pub meta: CheckpointMeta,
    pub generator: HashMap<String, Value>,
    pub critic: HashMap<String, Value>,
}

impl GanCheckpoint {
    pub fn new(
        experiment: ExperimentConfig,
        history: TrainingHistory,
        generator: HashMap<String, Value>,
        critic: HashMap<String, Value>,
    ) -> Self {
        Self {
            meta: CheckpointMeta {
                version: CHECKPOINT_VERSION.to_string(),
                experiment,
                history,
            },
            generator,
            critic,
        }
    }
}

/// Сохраняет чекпоинт в директорию, создавая её при необходимости.
pub fn save_checkpoint<P: AsRef<Path>>(path: P, checkpoint: &GanCheckpoint) -> Result<()> {
    let dir = path.as_ref();
    fs::create_dir_all(dir)?;

    fs::write(dir.join("meta.json"), serde_json::to_string_pretty(&checkpoint.meta)?)?;
    save_safetensors(dir.join("generator.safetensors"), &checkpoint.generator)?;
    save_safetensors(dir.join("critic.safetensors"), &checkpoint.critic)?;
    Ok(())
}

/// Загружает чекпоинт из директории.
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<GanCheckpoint> {
    let dir = path.as_ref();
    let existing = |name: &str| -> Result<PathBuf> {
        let file = dir.join(name);
        if file.exists() {
            Ok(file)
        } else {
            Err(CheckpointError::FileNotFound(file))
        }
    };

    let meta: CheckpointMeta = serde_json::from_str(&fs::read_to_string(existing("meta.json")?)?)?;
    let generator = load_safetensors(existing("generator.safetensors")?)?;
    let critic = load_safetensors(existing("critic.safetensors")?)?;

    Ok(GanCheckpoint { meta, generator, critic })
}
