use ndarray::{s, Array2};

use super::reflect_index;

/// Apply the 3x3 Laplacian kernel
///   0  1  0
///   1 -4  1
///   0  1  0
/// with mirrored borders.
pub fn laplacian(data: &Array2<f32>) -> Array2<f32> {
    let (h, w) = data.dim();
    let mut result = Array2::<f32>::zeros((h, w));
    if h == 0 || w == 0 {
        return result;
    }

    for row in 0..h {
        let up = reflect_index(row as isize - 1, h);
        let down = reflect_index(row as isize + 1, h);
        for col in 0..w {
            let left = reflect_index(col as isize - 1, w);
            let right = reflect_index(col as isize + 1, w);
            result[[row, col]] = data[[up, col]] + data[[down, col]] + data[[row, left]]
                + data[[row, right]]
                - 4.0 * data[[row, col]];
        }
    }

    result
}

/// Laplacian of a blurred frame sampled down by `stride`, returned as an
/// 8-bit magnitude image: `min(round(|L| * alpha), 255)`.
pub fn strided_laplacian_magnitude(blurred: &Array2<f32>, stride: usize, alpha: f32) -> Array2<f32> {
    let stride = stride.max(1) as isize;
    let sampled = blurred.slice(s![..;stride, ..;stride]).to_owned();
    laplacian(&sampled).mapv(|v| (v.abs() * alpha).round().min(255.0))
}
