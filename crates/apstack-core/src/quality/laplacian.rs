use ndarray::{s, ArrayView2};

use crate::filters::laplacian::laplacian;

/// Population standard deviation of all samples. Zero for empty input.
pub fn std_dev(data: ArrayView2<f32>) -> f64 {
    let count = data.len();
    if count == 0 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for &v in data.iter() {
        let v = v as f64;
        sum += v;
        sum_sq += v * v;
    }

    let mean = sum / count as f64;
    (sum_sq / count as f64 - mean * mean).max(0.0).sqrt()
}

/// Standard deviation of the Laplacian of the region sampled down by
/// `stride`. Orders regions the same way as the Laplacian variance.
pub fn laplace_contrast(data: ArrayView2<f32>, stride: usize) -> f64 {
    let stride = stride.max(1) as isize;
    let sampled = data.slice(s![..;stride, ..;stride]).to_owned();
    if sampled.is_empty() {
        return 0.0;
    }
    std_dev(laplacian(&sampled).view())
}
