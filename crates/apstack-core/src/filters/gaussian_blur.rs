use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

use super::reflect_index;

/// Sigma used for a Gaussian kernel of the given (odd) size when no explicit
/// sigma is requested. Matches the convention of common vision libraries.
pub fn sigma_for_kernel_size(ksize: usize) -> f32 {
    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Blur with a Gaussian kernel of width `kernel_width`. Even widths are rounded
/// up to the next odd size. A width of 0 or 1 returns an unmodified copy.
pub fn gaussian_blur_width(data: &Array2<f32>, kernel_width: usize) -> Array2<f32> {
    if kernel_width <= 1 {
        return data.clone();
    }
    let radius = kernel_width / 2;
    let ksize = 2 * radius + 1;
    let kernel = make_gaussian_kernel(radius, sigma_for_kernel_size(ksize));
    let row_pass = convolve_rows(data, &kernel);
    convolve_cols(&row_pass, &kernel)
}

fn make_gaussian_kernel(radius: usize, sigma: f32) -> Vec<f32> {
    let size = 2 * radius + 1;
    let mut kernel = vec![0.0f32; size];
    let s2 = 2.0 * sigma * sigma;
    let mut sum = 0.0f32;

    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f32 - radius as f32;
        *k = (-x * x / s2).exp();
        sum += *k;
    }

    for v in &mut kernel {
        *v /= sum;
    }

    kernel
}

fn blur_row(data: &Array2<f32>, row: usize, kernel: &[f32]) -> Vec<f32> {
    let w = data.ncols();
    let radius = kernel.len() as isize / 2;
    (0..w)
        .map(|col| {
            kernel
                .iter()
                .enumerate()
                .map(|(ki, &kv)| {
                    let src = reflect_index(col as isize + ki as isize - radius, w);
                    data[[row, src]] * kv
                })
                .sum()
        })
        .collect()
}

fn blur_col_row(data: &Array2<f32>, row: usize, kernel: &[f32]) -> Vec<f32> {
    let (h, w) = data.dim();
    let radius = kernel.len() as isize / 2;
    (0..w)
        .map(|col| {
            kernel
                .iter()
                .enumerate()
                .map(|(ki, &kv)| {
                    let src = reflect_index(row as isize + ki as isize - radius, h);
                    data[[src, col]] * kv
                })
                .sum()
        })
        .collect()
}

fn collect_rows(h: usize, w: usize, rows: Vec<Vec<f32>>) -> Array2<f32> {
    let mut result = Array2::<f32>::zeros((h, w));
    for (row, row_data) in rows.into_iter().enumerate() {
        for (col, val) in row_data.into_iter().enumerate() {
            result[[row, col]] = val;
        }
    }
    result
}

fn convolve_rows(data: &Array2<f32>, kernel: &[f32]) -> Array2<f32> {
    let (h, w) = data.dim();
    let rows: Vec<Vec<f32>> = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        (0..h)
            .into_par_iter()
            .map(|row| blur_row(data, row, kernel))
            .collect()
    } else {
        (0..h).map(|row| blur_row(data, row, kernel)).collect()
    };
    collect_rows(h, w, rows)
}

fn convolve_cols(data: &Array2<f32>, kernel: &[f32]) -> Array2<f32> {
    let (h, w) = data.dim();
    let rows: Vec<Vec<f32>> = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        (0..h)
            .into_par_iter()
            .map(|row| blur_col_row(data, row, kernel))
            .collect()
    } else {
        (0..h).map(|row| blur_col_row(data, row, kernel)).collect()
    };
    collect_rows(h, w, rows)
}
