use ndarray::{s, Array2, ArrayView2};

use crate::consts::{EPSILON, FINE_SEARCH_WIDTH};
use crate::filters::gaussian_blur::gaussian_blur_width;

use super::search::{neighborhood, sub_pixel_solve, SearchFailure, Window};

/// Normalized cross-correlation of `template` at every position where it
/// fits completely inside `image`.
///
/// `R(y, x) = sum(T * I) / sqrt(sum(T^2) * sum(I^2))` over the template
/// footprint; the result has shape `(H - h + 1, W - w + 1)`.
pub fn match_template_ccorr_normed(image: ArrayView2<f32>, template: ArrayView2<f32>) -> Array2<f32> {
    let (ih, iw) = image.dim();
    let (th, tw) = template.dim();
    if th == 0 || tw == 0 || th > ih || tw > iw {
        return Array2::zeros((0, 0));
    }

    let template_energy: f64 = template.iter().map(|&v| (v as f64) * (v as f64)).sum();
    let (rh, rw) = (ih - th + 1, iw - tw + 1);
    let mut result = Array2::<f32>::zeros((rh, rw));

    for ((y, x), out) in result.indexed_iter_mut() {
        let mut cross = 0.0f64;
        let mut energy = 0.0f64;
        for row in 0..th {
            for col in 0..tw {
                let i = image[[y + row, x + col]] as f64;
                cross += template[[row, col]] as f64 * i;
                energy += i * i;
            }
        }
        let denominator = (template_energy * energy).sqrt();
        *out = if denominator > EPSILON {
            (cross / denominator) as f32
        } else {
            0.0
        };
    }

    result
}

/// Position `(row, col)` of the first maximum in row-major order.
fn max_location(data: &Array2<f32>) -> (usize, usize) {
    let mut best = (0, 0);
    let mut best_val = f32::NEG_INFINITY;
    for ((row, col), &v) in data.indexed_iter() {
        if v > best_val {
            best_val = v;
            best = (row, col);
        }
    }
    best
}

/// Search width of the coarse phase for a given total search width.
pub fn first_phase_search_width(search_width: usize) -> usize {
    search_width.saturating_sub(FINE_SEARCH_WIDTH) / 2
}

/// Weights `1 - penalty * ((y/sw1 - 1)^2 + (x/sw1 - 1)^2)` over the coarse
/// correlation result. They favor optima close to the center.
pub fn weight_matrix_first_phase(search_width: usize, penalty_factor: f32) -> Array2<f32> {
    let sw1 = first_phase_search_width(search_width);
    let extent = 2 * sw1 + 1;
    if sw1 == 0 {
        return Array2::ones((extent, extent));
    }
    let sw1 = sw1 as f32;
    Array2::from_shape_fn((extent, extent), |(y, x)| {
        let ry = y as f32 / sw1 - 1.0;
        let rx = x as f32 / sw1 - 1.0;
        1.0 - penalty_factor * (ry * ry + rx * rx)
    })
}

/// Shift and success flag of one correlation phase.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PhaseShift {
    pub dy: f32,
    pub dx: f32,
    /// The optimum lies strictly inside the phase's search area.
    pub success: bool,
}

/// Combined result of both correlation phases.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MultiLevelShift {
    pub first_phase: PhaseShift,
    pub second_phase: PhaseShift,
}

impl MultiLevelShift {
    pub fn success(&self) -> bool {
        self.first_phase.success && self.second_phase.success
    }

    pub fn total(&self) -> (f32, f32) {
        (
            self.first_phase.dy + self.second_phase.dy,
            self.first_phase.dx + self.second_phase.dx,
        )
    }
}

/// Two-phase correlation search.
///
/// The coarse phase correlates `reference_first_phase` (the reference box
/// sampled down by 2) with a stride-2, additionally blurred window around the
/// box, covering `(search_width - 4) / 2` coarse pixels. The fine phase
/// correlates `reference_second_phase` on the original grid in a window
/// displaced by the coarse shift and extended by 4 pixels.
///
/// A phase whose optimum hits its search border reports failure. If the
/// coarse phase fails, all shifts are zero; if the fine phase fails, its
/// shift is zero.
#[allow(clippy::too_many_arguments)]
pub fn multilevel_correlation(
    reference_first_phase: ArrayView2<f32>,
    frame: ArrayView2<f32>,
    blur_width: usize,
    reference_second_phase: ArrayView2<f32>,
    window: Window,
    search_width: usize,
    weight_matrix: Option<&Array2<f32>>,
    sub_pixel: bool,
) -> std::result::Result<MultiLevelShift, SearchFailure> {
    let fine = FINE_SEARCH_WIDTH as isize;
    let sw1 = first_phase_search_width(search_width) as isize;
    let extension = 2 * sw1;

    let coarse_window = window.expanded(extension);
    let coarse_view = coarse_window
        .view(frame)
        .ok_or(SearchFailure::OutsideFrame)?;
    let coarse = gaussian_blur_width(&coarse_view.slice(s![..;2, ..;2]).to_owned(), blur_width);

    let mut correlation = match_template_ccorr_normed(coarse.view(), reference_first_phase);
    if correlation.is_empty() {
        return Err(SearchFailure::OutsideFrame);
    }
    if let Some(weights) = weight_matrix {
        if weights.dim() == correlation.dim() {
            correlation *= weights;
        }
    }
    let (loc_y, loc_x) = max_location(&correlation);
    let first_dy = (sw1 - loc_y as isize) * 2;
    let first_dx = (sw1 - loc_x as isize) * 2;
    let first_success = first_dy.abs() != extension && first_dx.abs() != extension;

    if !first_success {
        return Ok(MultiLevelShift::default());
    }

    let fine_window = window.shifted(first_dy, first_dx).expanded(fine);
    let fine_view = fine_window
        .view(frame)
        .ok_or(SearchFailure::OutsideFrame)?;
    let correlation = match_template_ccorr_normed(fine_view, reference_second_phase);
    if correlation.is_empty() {
        return Err(SearchFailure::OutsideFrame);
    }
    let (loc_y, loc_x) = max_location(&correlation);
    let mut second_dy = (fine - loc_y as isize) as f32;
    let mut second_dx = (fine - loc_x as isize) as f32;
    let second_success = (fine - loc_y as isize).abs() != fine && (fine - loc_x as isize).abs() != fine;

    if !second_success {
        second_dy = 0.0;
        second_dx = 0.0;
    } else if sub_pixel {
        let values = correlation.mapv(|v| v as f64);
        if let Some((y_corr, x_corr)) =
            neighborhood(&values, loc_y, loc_x).and_then(|n| sub_pixel_solve(&n).ok())
        {
            if y_corr.abs() <= 1.0 && x_corr.abs() <= 1.0 {
                second_dy -= y_corr as f32;
                second_dx -= x_corr as f32;
            }
        }
    }

    Ok(MultiLevelShift {
        first_phase: PhaseShift {
            dy: first_dy as f32,
            dx: first_dx as f32,
            success: true,
        },
        second_phase: PhaseShift {
            dy: second_dy,
            dx: second_dx,
            success: second_success,
        },
    })
}
