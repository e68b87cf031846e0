//! Reporting sinks: where epoch summaries and sample batches go.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Cannot render samples: {0}")]
    Render(String),
}

/// Losses of a reported epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub num_epochs: usize,
    pub critic_loss: f32,
    pub generator_loss: f32,
}

/// The last critic-phase fake batch and the last real batch of an epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    pub epoch: usize,
    pub fake: ArrayD<f32>,
    pub real: ArrayD<f32>,
}

pub trait ReportSink {
    fn report(&mut self, report: &EpochReport) -> Result<(), SinkError>;

    fn samples(&mut self, _samples: &SampleBatch) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes each report as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&mut self, r: &EpochReport) -> Result<(), SinkError> {
        info!(
            "[Epoch {}/{}] [D loss: {:.6}] [G loss: {:.6}]",
            r.epoch, r.num_epochs, r.critic_loss, r.generator_loss
        );
        Ok(())
    }
}

/// Keeps everything it receives.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub reports: Vec<EpochReport>,
    pub samples: Vec<SampleBatch>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reported_epochs(&self) -> Vec<usize> {
        self.reports.iter().map(|r| r.epoch).collect()
    }
}

impl ReportSink for MemorySink {
    fn report(&mut self, report: &EpochReport) -> Result<(), SinkError> {
        self.reports.push(*report);
        Ok(())
    }

    fn samples(&mut self, samples: &SampleBatch) -> Result<(), SinkError> {
        self.samples.push(samples.clone());
        Ok(())
    }
}

/// Forwards to two sinks in order.
pub struct Tee<A, B>(pub A, pub B);

impl<A: ReportSink, B: ReportSink> ReportSink for Tee<A, B> {
    fn report(&mut self, report: &EpochReport) -> Result<(), SinkError> {
        self.0.report(report)?;
        self.1.report(report)
    }

    fn samples(&mut self, samples: &SampleBatch) -> Result<(), SinkError> {
        self.0.samples(samples)?;
        self.1.samples(samples)
    }
}
