use ndarray::{Array2, ArrayView2};
use num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::{Result, StackError};

/// Integer shift `[dy, dx]` by which `frame` has to be moved to match
/// `reference`, from FFT phase correlation.
///
/// Both windows must have the same shape. Peak positions beyond half the
/// window extent wrap around to negative shifts.
pub fn translation(reference: ArrayView2<f32>, frame: ArrayView2<f32>) -> Result<[i32; 2]> {
    let (h, w) = reference.dim();
    let (fh, fw) = frame.dim();
    if h != fh || w != fw {
        return Err(StackError::Argument(format!(
            "window size mismatch: {}x{} vs {}x{}",
            w, h, fw, fh
        )));
    }
    if h == 0 || w == 0 {
        return Err(StackError::InvalidDimensions {
            width: w,
            height: h,
        });
    }

    let ref_fft = fft2d(reference);
    let frame_fft = fft2d(frame);
    let cross_power = normalized_cross_power(&ref_fft, &frame_fft);
    let correlation = ifft2d_magnitude(&cross_power);
    let (peak_row, peak_col) = find_peak(&correlation);

    let dy = if peak_row > h / 2 {
        peak_row as i32 - h as i32
    } else {
        peak_row as i32
    };
    let dx = if peak_col > w / 2 {
        peak_col as i32 - w as i32
    } else {
        peak_col as i32
    };

    Ok([dy, dx])
}

/// 2D FFT: row-wise FFT, then column-wise FFT.
fn fft2d(data: ArrayView2<f32>) -> Array2<Complex<f64>> {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::new();
    let fft_row = planner.plan_fft_forward(w);
    let fft_col = planner.plan_fft_forward(h);

    let mut result = data.mapv(|v| Complex::new(v as f64, 0.0));

    for mut row in result.rows_mut() {
        let mut row_data: Vec<Complex<f64>> = row.to_vec();
        fft_row.process(&mut row_data);
        row.assign(&ndarray::ArrayView1::from(&row_data));
    }

    for mut col in result.columns_mut() {
        let mut col_data: Vec<Complex<f64>> = col.to_vec();
        fft_col.process(&mut col_data);
        col.assign(&ndarray::ArrayView1::from(&col_data));
    }

    result
}

/// Inverse 2D FFT, returning the magnitude of each (normalized) sample.
fn ifft2d_magnitude(data: &Array2<Complex<f64>>) -> Array2<f64> {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::new();
    let ifft_row = planner.plan_fft_inverse(w);
    let ifft_col = planner.plan_fft_inverse(h);

    let mut work = data.clone();

    for mut col in work.columns_mut() {
        let mut col_data: Vec<Complex<f64>> = col.to_vec();
        ifft_col.process(&mut col_data);
        col.assign(&ndarray::ArrayView1::from(&col_data));
    }

    for mut row in work.rows_mut() {
        let mut row_data: Vec<Complex<f64>> = row.to_vec();
        ifft_row.process(&mut row_data);
        row.assign(&ndarray::ArrayView1::from(&row_data));
    }

    let scale = 1.0 / (h * w) as f64;
    work.mapv(|c| c.norm() * scale)
}

fn normalized_cross_power(
    ref_fft: &Array2<Complex<f64>>,
    frame_fft: &Array2<Complex<f64>>,
) -> Array2<Complex<f64>> {
    let mut result = Array2::<Complex<f64>>::zeros(ref_fft.raw_dim());
    ndarray::Zip::from(&mut result)
        .and(ref_fft)
        .and(frame_fft)
        .for_each(|out, &r, &f| {
            let cross = r * f.conj();
            let mag = cross.norm();
            *out = if mag > 1e-12 {
                cross / mag
            } else {
                Complex::new(0.0, 0.0)
            };
        });
    result
}

/// Position of the first maximum in row-major order.
fn find_peak(data: &Array2<f64>) -> (usize, usize) {
    let mut best = (0, 0);
    let mut best_val = f64::NEG_INFINITY;
    for ((row, col), &v) in data.indexed_iter() {
        if v > best_val {
            best_val = v;
            best = (row, col);
        }
    }
    best
}
