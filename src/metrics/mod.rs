//! Метрики, отслеживаемые во время обучения.

pub mod running;

pub use running::RunningMean;
