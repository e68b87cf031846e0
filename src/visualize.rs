//! PNG output: sample grids and loss curves.

use crate::gan::{EpochReport, ReportSink, SampleBatch, SinkError, TrainingHistory};
use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::{ArrayD, ArrayView2, Axis};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Tiles per row and per column of a sample grid.
pub const GRID_SIDE: usize = 4;
const GAP: u32 = 1;

/// Maps `[-1, 1]` to `[0, 255]`, clamping.
fn to_pixel(value: f32) -> u8 {
    ((value * 0.5 + 0.5).clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Channel 0 of sample `index` as a 2-D view.
fn first_channel(batch: &ArrayD<f32>, index: usize) -> Result<ArrayView2<'_, f32>, SinkError> {
    let sample = batch.index_axis(Axis(0), index);
    let plane = match sample.ndim() {
        1 => sample.insert_axis(Axis(0)),
        2 => sample.index_axis_move(Axis(0), 0).insert_axis(Axis(0)),
        _ => {
            let mut plane = sample.index_axis_move(Axis(0), 0);
            while plane.ndim() > 2 {
                plane = plane.index_axis_move(Axis(0), 0);
            }
            plane
        }
    };
    plane
        .into_dimensionality()
        .map_err(|e| SinkError::Render(e.to_string()))
}

/// Up to `GRID_SIDE²` samples of `batch` (`[N, C, H, W]`, `[N, C, W]` or
/// `[N, W]`), channel 0, tiled row-major.
pub fn render_grid(batch: &ArrayD<f32>) -> Result<GrayImage, SinkError> {
    if batch.ndim() < 2 || batch.is_empty() {
        return Err(SinkError::Render(format!("cannot tile a batch of shape {:?}", batch.shape())));
    }
    let count = batch.shape()[0].min(GRID_SIDE * GRID_SIDE);
    let first = first_channel(batch, 0)?;
    let (tile_h, tile_w) = (first.nrows() as u32, first.ncols() as u32);
    let cols = count.min(GRID_SIDE) as u32;
    let rows = count.div_ceil(GRID_SIDE) as u32;

    let mut img = GrayImage::new(cols * (tile_w + GAP) - GAP, rows * (tile_h + GAP) - GAP);
    for index in 0..count {
        let plane = first_channel(batch, index)?;
        let x0 = (index % GRID_SIDE) as u32 * (tile_w + GAP);
        let y0 = (index / GRID_SIDE) as u32 * (tile_h + GAP);
        for ((y, x), &value) in plane.indexed_iter() {
            img.put_pixel(x0 + x as u32, y0 + y as u32, Luma([to_pixel(value)]));
        }
    }
    Ok(img)
}

/// Writes `generated_{epoch}.png` and `real_{epoch}.png` into a directory
/// for every sample batch it receives.
#[derive(Debug, Clone)]
pub struct ImageGridSink {
    dir: PathBuf,
}

impl ImageGridSink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, SinkError> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ReportSink for ImageGridSink {
    fn report(&mut self, _report: &EpochReport) -> Result<(), SinkError> {
        Ok(())
    }

    fn samples(&mut self, samples: &SampleBatch) -> Result<(), SinkError> {
        let generated = self.dir.join(format!("generated_{}.png", samples.epoch));
        let real = self.dir.join(format!("real_{}.png", samples.epoch));
        render_grid(&samples.fake)?.save(&generated)?;
        render_grid(&samples.real)?.save(&real)?;
        debug!(path = %generated.display(), "sample grid saved");
        Ok(())
    }
}

// ============================================================================
// Loss curves
// ============================================================================

const CRITIC_COLOR: Rgb<u8> = Rgb([200, 40, 40]);
const GENERATOR_COLOR: Rgb<u8> = Rgb([40, 80, 200]);

/// Critic (red) and generator (blue) losses per epoch on a white canvas,
/// both on one vertical scale.
pub fn render_loss_curves(history: &TrainingHistory, width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(width.max(2), height.max(2), Rgb([255, 255, 255]));
    let critic = history.critic_losses();
    let generator = history.generator_losses();

    let (lo, hi) = critic
        .iter()
        .chain(generator.iter())
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return img;
    }
    let span = if hi > lo { hi - lo } else { 1.0 };

    for (series, color) in [(&critic, CRITIC_COLOR), (&generator, GENERATOR_COLOR)] {
        let points: Vec<(f32, f32)> = series
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let x = if series.len() > 1 {
                    i as f32 / (series.len() - 1) as f32
                } else {
                    0.5
                };
                (x * (img.width() - 1) as f32, (1.0 - (v - lo) / span) * (img.height() - 1) as f32)
            })
            .collect();
        for segment in points.windows(2) {
            draw_segment(&mut img, segment[0], segment[1], color);
        }
        if let [only] = points.as_slice() {
            draw_segment(&mut img, *only, *only, color);
        }
    }
    img
}

fn draw_segment(img: &mut RgbImage, from: (f32, f32), to: (f32, f32), color: Rgb<u8>) {
    let steps = (to.0 - from.0).abs().max((to.1 - from.1).abs()).ceil().max(1.0) as usize;
    for s in 0..=steps {
        let t = s as f32 / steps as f32;
        let x = from.0 + (to.0 - from.0) * t;
        let y = from.1 + (to.1 - from.1) * t;
        if x.is_finite() && y.is_finite() {
            let (x, y) = (x.round() as u32, y.round() as u32);
            if x < img.width() && y < img.height() {
                img.put_pixel(x, y, color);
            }
        }
    }
}

/// Saves the loss curves as a PNG (e.g. `losses.png`).
pub fn save_loss_plot<P: AsRef<Path>>(history: &TrainingHistory, path: P) -> Result<(), SinkError> {
    render_loss_curves(history, 640, 360).save(path)?;
    Ok(())
}
