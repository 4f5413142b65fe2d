#![allow(dead_code)]

use std::f64::consts::PI;

use apstack_core::frame::BitDepth;
use apstack_core::pipeline::config::StackConfig;
use apstack_core::source::{MemoryFrameSource, SourceOptions};
use ndarray::Array2;

/// Smooth, non-periodic-looking test pattern on the 16-bit scale.
pub fn wave_value(y: f64, x: f64) -> f32 {
    let v = 24000.0
        + 7000.0 * (2.0 * PI * x / 47.0).sin() * (2.0 * PI * y / 53.0).sin()
        + 4000.0 * (2.0 * PI * (x + 2.0 * y) / 71.0).sin()
        + 2500.0 * (2.0 * PI * (3.0 * x - y) / 89.0).cos();
    v as f32
}

/// Wave field whose content is moved by `(dy, dx)`: pixel `(y, x)` shows the
/// pattern at `(y - dy, x - dx)`.
pub fn wave_field(h: usize, w: usize, dy: i32, dx: i32) -> Array2<f32> {
    Array2::from_shape_fn((h, w), |(y, x)| {
        wave_value(y as f64 - dy as f64, x as f64 - dx as f64)
    })
}

/// Uniform background with one bright square whose top-left corner is at
/// `(y, x)`.
pub fn bright_square(h: usize, w: usize, y: usize, x: usize, size: usize, background: f32, value: f32) -> Array2<f32> {
    Array2::from_shape_fn((h, w), |(row, col)| {
        if row >= y && row < y + size && col >= x && col < x + size {
            value
        } else {
            background
        }
    })
}

/// Copy of `data` with content moved by `(dy, dx)`; uncovered pixels repeat
/// the nearest edge pixel.
pub fn shifted(data: &Array2<f32>, dy: isize, dx: isize) -> Array2<f32> {
    let (h, w) = data.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let sy = (y as isize - dy).clamp(0, h as isize - 1) as usize;
        let sx = (x as isize - dx).clamp(0, w as isize - 1) as usize;
        data[[sy, sx]]
    })
}

/// Deterministic texture without dominant periodicity.
pub fn texture(h: usize, w: usize) -> Array2<f32> {
    Array2::from_shape_fn((h, w), |(y, x)| {
        let mut v = (y as u64).wrapping_mul(73_856_093) ^ (x as u64).wrapping_mul(19_349_663);
        v = v.wrapping_mul(2_654_435_761) % 10_007;
        v as f32
    })
}

/// Circular shift moving content by `(dy, dx)`.
pub fn rolled(data: &Array2<f32>, dy: isize, dx: isize) -> Array2<f32> {
    let (h, w) = data.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let sy = (y as isize - dy).rem_euclid(h as isize) as usize;
        let sx = (x as isize - dx).rem_euclid(w as isize) as usize;
        data[[sy, sx]]
    })
}

/// 16-bit monochrome in-memory source without extra blur.
pub fn mono_source(frames: Vec<Array2<f32>>) -> MemoryFrameSource {
    MemoryFrameSource::from_mono(
        frames,
        BitDepth::Sixteen,
        SourceOptions {
            gauss_width: 0,
            laplacian_stride: 2,
        },
    )
    .expect("valid synthetic frames")
}

/// Deterministic small shifts in `-limit..=limit`.
pub fn pseudo_random_shifts(count: usize, limit: i32) -> Vec<(i32, i32)> {
    let span = (2 * limit + 1) as u64;
    let mut state = 0x2545_f491_4f6c_dd1du64;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let dy = (state % span) as i32 - limit;
            let dx = ((state / span) % span) as i32 - limit;
            (dy, dx)
        })
        .collect()
}

/// Config matching the synthetic 16-bit frames: no blur, no brightness
/// normalization.
pub fn test_config() -> StackConfig {
    let mut config = StackConfig::default();
    config.frames.gauss_width = 0;
    config.frames.normalization = false;
    config
}
