//! Synthetic multi-channel sinusoid "images" for runs without a dataset.
//!
//! Each row of each channel is `a·sin(2π·f·t + φ)` over the row, with
//! amplitude, frequency and phase drawn per sample and channel. Values lie
//! in `[-1, 1]`.

use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::Rng;
use std::f32::consts::PI;

/// `num_samples` samples of shape `sample_shape` (`[channels, rows, width]`,
/// or `[channels, width]`).
pub fn sinusoids(num_samples: usize, sample_shape: &[usize], rng: &mut StdRng) -> ArrayD<f32> {
    let mut shape = vec![num_samples];
    shape.extend_from_slice(sample_shape);
    let mut data = ArrayD::zeros(IxDyn(&shape));

    let channels = if sample_shape.len() >= 2 { sample_shape[0] } else { 1 };
    let width = sample_shape.last().copied().unwrap_or(1).max(1);
    let rows: usize = sample_shape.iter().skip(1).rev().skip(1).product();
    let per_channel = rows * width;

    for (n, mut sample) in data.outer_iter_mut().enumerate() {
        let values = match sample.as_slice_mut() {
            Some(values) => values,
            None => continue,
        };
        for c in 0..channels {
            let amplitude: f32 = rng.gen_range(0.5..=1.0);
            let frequency: f32 = rng.gen_range(1.0..4.0);
            let phase: f32 = rng.gen_range(0.0..2.0 * PI);
            for r in 0..rows {
                // соседние строки слегка сдвинуты по фазе
                let row_phase = phase + 0.1 * r as f32 + 0.01 * n as f32;
                for x in 0..width {
                    let t = x as f32 / width as f32;
                    values[c * per_channel + r * width + x] =
                        amplitude * (2.0 * PI * frequency * t + row_phase).sin();
                }
            }
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_shape_and_range() {
        let data = sinusoids(5, &[2, 3, 8], &mut StdRng::seed_from_u64(0));
        assert_eq!(data.shape(), &[5, 2, 3, 8]);
        assert!(data.iter().all(|v| (-1.0..=1.0).contains(v)));
        assert!(data.iter().any(|v| v.abs() > 0.1));
    }

    #[test]
    fn test_seeded() {
        let a = sinusoids(3, &[1, 16], &mut StdRng::seed_from_u64(9));
        let b = sinusoids(3, &[1, 16], &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }
}
