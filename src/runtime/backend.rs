//! Абстрактный интерфейс (трейт) исполнительных бэкендов.

use crate::asg::{Asg, AsgId, NodeId, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Ошибки выполнения графа. Общие для всех бэкендов.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Узел с ID {0} не найден в графе {1}. Проверьте, что граф был корректно построен.")]
    NodeNotFound(NodeId, AsgId),

    #[error("Несоответствие типов: операция ожидала {expected}, но получила {actual}.")]
    TypeError { expected: String, actual: String },

    #[error("Ошибка формы тензора: {0}. Проверьте размерности входных тензоров.")]
    ShapeError(String),

    #[error("Отсутствует значение для входа '{0}' (узел ID: {1}). Передайте его в feeds при вызове Executable::run().")]
    MissingInput(String, NodeId),

    #[error("Отсутствует значение для параметра '{0}' (узел ID: {1}). Инициализируйте параметр перед выполнением графа.")]
    MissingParameter(String, NodeId),
}

/// Кэш уже вычисленных значений узлов, ключ `(AsgId, NodeId)`.
pub type Memo<T> = HashMap<(AsgId, NodeId), T>;

/// Общий интерфейс исполнительной среды.
///
/// A backend takes a graph plus a memo pre-filled with the values of its
/// `Input` and `Parameter` nodes and evaluates every node reachable from
/// the graph outputs.
pub trait Backend {
    /// Данные, специфичные для устройства.
    type DeviceData: std::fmt::Debug + Clone;

    /// Переносит данные с CPU на устройство.
    fn load_data(
        &self,
        data: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Self::DeviceData>, RuntimeError>;

    /// Выполняет граф.
    ///
    /// Returns the values of `main_asg.outputs` (in order) and the final
    /// memo with every intermediate result.
    fn run(
        &self,
        main_asg: &Asg,
        initial_memo: Memo<Self::DeviceData>,
    ) -> Result<(Vec<Self::DeviceData>, Memo<Self::DeviceData>), RuntimeError>;

    /// Забирает результат с устройства обратно в виде `Value`.
    fn retrieve_data(&self, device_data: &[Self::DeviceData]) -> Result<Vec<Value>, RuntimeError>;
}
