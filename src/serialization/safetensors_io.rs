//! Чтение и запись весов в формате SafeTensors.
//!
//! Tensors are written as little-endian F32. Files holding F64 tensors are
//! accepted on load and narrowed to f32.

use crate::asg::Value;
use ndarray::{ArrayD, IxDyn};
use safetensors::serialize_to_file;
use safetensors::tensor::{SafeTensors, TensorView};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SafeTensorsError {
    #[error("Ошибка ввода/вывода: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Ошибка SafeTensors: {0}")]
    SafeTensorsError(#[from] safetensors::SafeTensorError),

    #[error("Неподдерживаемый тип данных: {0}")]
    UnsupportedDtype(String),

    #[error("Ошибка формы тензора '{name}': форма {shape:?}, элементов {actual}")]
    ShapeMismatch {
        name: String,
        shape: Vec<usize>,
        actual: usize,
    },

    #[error("Тензор '{0}' не найден")]
    TensorNotFound(String),
}

type Result<T> = std::result::Result<T, SafeTensorsError>;

/// Сохраняет именованные значения в файл SafeTensors. Scalars are stored
/// as rank-0 tensors.
pub fn save_safetensors<P: AsRef<Path>>(path: P, tensors: &HashMap<String, Value>) -> Result<()> {
    // Байты должны жить дольше, чем TensorView, ссылающиеся на них
    let mut encoded: Vec<(&str, Vec<usize>, Vec<u8>)> = tensors
        .iter()
        .map(|(name, value)| {
            let arr = value.to_tensor();
            let bytes: Vec<u8> = arr.iter().flat_map(|x| x.to_le_bytes()).collect();
            (name.as_str(), arr.shape().to_vec(), bytes)
        })
        .collect();
    encoded.sort_by(|a, b| a.0.cmp(b.0));

    let mut views: Vec<(&str, TensorView<'_>)> = Vec::with_capacity(encoded.len());
    for (name, shape, bytes) in &encoded {
        views.push((*name, TensorView::new(safetensors::Dtype::F32, shape.clone(), bytes)?));
    }

    serialize_to_file(views, &None, path.as_ref())?;
    Ok(())
}

/// Загружает все тензоры из файла SafeTensors.
pub fn load_safetensors<P: AsRef<Path>>(path: P) -> Result<HashMap<String, Value>> {
    let buffer = std::fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut result = HashMap::new();
    for (name, tensor) in tensors.tensors() {
        let floats: Vec<f32> = match tensor.dtype() {
            safetensors::Dtype::F32 => tensor
                .data()
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            safetensors::Dtype::F64 => tensor
                .data()
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
                .collect(),
            other => return Err(SafeTensorsError::UnsupportedDtype(format!("{:?}", other))),
        };

        let shape = tensor.shape().to_vec();
        let actual = floats.len();
        let arr = ArrayD::from_shape_vec(IxDyn(&shape), floats).map_err(|_| SafeTensorsError::ShapeMismatch {
            name: name.clone(),
            shape: shape.clone(),
            actual,
        })?;
        result.insert(name, Value::Tensor(arr));
    }
    Ok(result)
}

/// Загружает один тензор по имени.
pub fn load_tensor<P: AsRef<Path>>(path: P, name: &str) -> Result<Value> {
    load_safetensors(path)?
        .remove(name)
        .ok_or_else(|| SafeTensorsError::TensorNotFound(name.to_string()))
}

/// Имена тензоров в файле.
pub fn list_tensors<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let buffer = std::fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;
    Ok(tensors.names().iter().map(|s| s.to_string()).collect())
}
