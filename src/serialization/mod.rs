//! Сериализация весов и чекпоинтов.
//!
//! - **SafeTensors**: бинарный формат для тензоров (веса, датасеты)
//! - **Checkpoint**: веса обеих сетей плюс `meta.json` с конфигурацией и историей
//!
//! ```rust,ignore
//! use rustygan::serialization::{save_safetensors, load_safetensors};
//!
//! save_safetensors("generator.safetensors", generator.parameters())?;
//! let loaded = load_safetensors("generator.safetensors")?;
//! ```

pub mod checkpoint;
pub mod safetensors_io;

pub use checkpoint::{load_checkpoint, save_checkpoint, CheckpointError, CheckpointMeta, GanCheckpoint};
pub use safetensors_io::{list_tensors, load_safetensors, load_tensor, save_safetensors, SafeTensorsError};
