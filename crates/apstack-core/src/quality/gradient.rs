use ndarray::{s, ArrayView2};

/// Mean gradient magnitude of the region sampled down by `stride`.
///
/// Forward differences in x and y are taken on a common `(h-1, w-1)` grid.
pub fn local_contrast(data: ArrayView2<f32>, stride: usize) -> f64 {
    let stride = stride.max(1) as isize;
    let f = data.slice(s![..;stride, ..;stride]);
    let (h, w) = f.dim();
    if h < 2 || w < 2 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    for row in 0..h - 1 {
        for col in 0..w - 1 {
            let dx = (f[[row + 1, col + 1]] - f[[row + 1, col]]) as f64;
            let dy = (f[[row + 1, col + 1]] - f[[row, col + 1]]) as f64;
            sum += dx.hypot(dy);
        }
    }

    sum / ((h - 1) * (w - 1)) as f64
}

/// Mean Sobel gradient magnitude of the region sampled down by `stride`.
///
/// Sobel kernels:
///   Gx = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]]
///   Gy = [[-1, -2, -1], [0, 0, 0], [1, 2, 1]]
pub fn sobel_contrast(data: ArrayView2<f32>, stride: usize) -> f64 {
    let stride = stride.max(1) as isize;
    let f = data.slice(s![..;stride, ..;stride]);
    let (h, w) = f.dim();
    if h < 3 || w < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    for row in 1..h - 1 {
        for col in 1..w - 1 {
            let gx = -f[[row - 1, col - 1]] as f64 + f[[row - 1, col + 1]] as f64
                - 2.0 * f[[row, col - 1]] as f64
                + 2.0 * f[[row, col + 1]] as f64
                - f[[row + 1, col - 1]] as f64
                + f[[row + 1, col + 1]] as f64;

            let gy = -f[[row - 1, col - 1]] as f64
                - 2.0 * f[[row - 1, col]] as f64
                - f[[row - 1, col + 1]] as f64
                + f[[row + 1, col - 1]] as f64
                + 2.0 * f[[row + 1, col]] as f64
                + f[[row + 1, col + 1]] as f64;

            sum += gx.hypot(gy);
        }
    }

    sum / ((h - 2) * (w - 2)) as f64
}

/// Amount of structure in a box: the smaller of the mean absolute first
/// differences along x and along y.
pub fn quality_measure(data: ArrayView2<f32>) -> f64 {
    let (h, w) = data.dim();
    if h < 2 || w < 2 {
        return 0.0;
    }

    let mut sum_x = 0.0f64;
    for row in 0..h {
        for col in 0..w - 1 {
            sum_x += (data[[row, col + 1]] - data[[row, col]]).abs() as f64;
        }
    }
    let mut sum_y = 0.0f64;
    for row in 0..h - 1 {
        for col in 0..w {
            sum_y += (data[[row + 1, col]] - data[[row, col]]).abs() as f64;
        }
    }

    let sharpness_x = sum_x / (h * (w - 1)) as f64;
    let sharpness_y = sum_y / ((h - 1) * w) as f64;
    sharpness_x.min(sharpness_y)
}

/// Structure measure that only counts pixels brighter than `black_threshold`.
///
/// Gradients are central differences over `2 * stride` pixels, summed where
/// the center pixel passes the threshold. When more than `min_fraction` of the
/// pixels pass, the sums are divided by that fraction so that patches with a
/// few dark pixels are not penalized. The smaller directional sum is returned.
pub fn quality_measure_threshold_weighted(
    data: ArrayView2<f32>,
    stride: usize,
    black_threshold: f32,
    min_fraction: f64,
) -> f64 {
    let (h, w) = data.dim();
    let size = h * w;
    if size == 0 {
        return 0.0;
    }
    let stride_2 = 2 * stride;

    let bright = data.iter().filter(|&&v| v > black_threshold).count();
    let mask_fraction = bright as f64 / size as f64;

    let mut sum_horizontal = 0.0f64;
    if w > stride_2 {
        for row in 0..h {
            for col in 0..w - stride_2 {
                if data[[row, col + stride]] > black_threshold {
                    sum_horizontal += (data[[row, col + stride_2]] - data[[row, col]]).abs() as f64;
                }
            }
        }
    }

    let mut sum_vertical = 0.0f64;
    if h > stride_2 {
        for row in 0..h - stride_2 {
            for col in 0..w {
                if data[[row + stride, col]] > black_threshold {
                    sum_vertical += (data[[row + stride_2, col]] - data[[row, col]]).abs() as f64;
                }
            }
        }
    }

    if mask_fraction > min_fraction {
        sum_horizontal /= mask_fraction;
        sum_vertical /= mask_fraction;
    }

    sum_horizontal.min(sum_vertical)
}
