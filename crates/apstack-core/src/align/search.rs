use ndarray::{Array2, ArrayView2};
use thiserror::Error;

use crate::consts::{EPSILON, UNSET_DEVIATION};
use crate::error::{Result, StackError};
use crate::frame::Rect;

/// Box bounds in frame coordinates. Signed because shifted windows may
/// reach beyond the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub y_low: isize,
    pub y_high: isize,
    pub x_low: isize,
    pub x_high: isize,
}

impl Window {
    pub fn new(y_low: isize, y_high: isize, x_low: isize, x_high: isize) -> Self {
        Self {
            y_low,
            y_high,
            x_low,
            x_high,
        }
    }

    /// Window read from the frame when probing shift `(dy, dx)`.
    pub fn shifted(&self, dy: isize, dx: isize) -> Self {
        Self::new(
            self.y_low - dy,
            self.y_high - dy,
            self.x_low - dx,
            self.x_high - dx,
        )
    }

    /// Grow the window by `margin` pixels on every side.
    pub fn expanded(&self, margin: isize) -> Self {
        Self::new(
            self.y_low - margin,
            self.y_high + margin,
            self.x_low - margin,
            self.x_high + margin,
        )
    }

    pub fn height(&self) -> usize {
        (self.y_high - self.y_low).max(0) as usize
    }

    pub fn width(&self) -> usize {
        (self.x_high - self.x_low).max(0) as usize
    }

    pub fn fits_in(&self, shape: (usize, usize)) -> bool {
        self.y_low >= 0
            && self.x_low >= 0
            && self.y_high <= shape.0 as isize
            && self.x_high <= shape.1 as isize
            && self.y_low < self.y_high
            && self.x_low < self.x_high
    }

    /// View of the frame inside the window, or `None` if it leaves the frame.
    pub fn view<'a>(&self, frame: ArrayView2<'a, f32>) -> Option<ArrayView2<'a, f32>> {
        if !self.fits_in(frame.dim()) {
            return None;
        }
        Some(frame.slice_move(ndarray::s![
            self.y_low..self.y_high,
            self.x_low..self.x_high
        ]))
    }
}

impl From<Rect> for Window {
    fn from(rect: Rect) -> Self {
        Self::new(
            rect.y_low as isize,
            rect.y_high as isize,
            rect.x_low as isize,
            rect.x_high as isize,
        )
    }
}

/// Successful local search.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalShift {
    pub dy: f32,
    pub dx: f32,
    /// Minimum deviation per search step (ring radius or descent step).
    pub dev_r: Vec<f64>,
}

impl LocalShift {
    pub fn integer(dy: isize, dx: isize, dev_r: Vec<f64>) -> Self {
        Self {
            dy: dy as f32,
            dx: dx as f32,
            dev_r,
        }
    }
}

/// Expected per-item failure of a shift search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SearchFailure {
    /// The search reached its radius without finding a local optimum.
    #[error("search did not converge within the search width")]
    NotConverged,
    /// The optimum lies on the border of the search window.
    #[error("optimum lies on the search window boundary")]
    BoundaryOptimum,
    /// The reference window does not fit into the frame.
    #[error("search window leaves the frame")]
    OutsideFrame,
}

/// Offsets on the square ring of Chebyshev radius `r` around `(y, x)`.
///
/// Radius 0 yields the center only. Otherwise the walk starts next to the
/// top-left corner, runs counter-clockwise and ends on that corner, giving
/// `8 r` points.
pub fn circle_around(y: isize, x: isize, r: isize) -> Vec<(isize, isize)> {
    if r == 0 {
        return vec![(y, x)];
    }

    let mut points = Vec::with_capacity(8 * r as usize);
    let (mut j, mut i) = (y - r, x - r);
    while i < x + r {
        i += 1;
        points.push((j, i));
    }
    while j < y + r {
        j += 1;
        points.push((j, i));
    }
    while i > x - r {
        i -= 1;
        points.push((j, i));
    }
    while j > y - r {
        j -= 1;
        points.push((j, i));
    }
    points
}

/// Sum of absolute differences between the reference box and the frame
/// window probed at shift `(dy, dx)`, both sampled with `stride`.
/// Infinite if the probed window leaves the frame.
pub fn deviation(
    reference: ArrayView2<f32>,
    frame: ArrayView2<f32>,
    window: Window,
    dy: isize,
    dx: isize,
    stride: usize,
) -> f64 {
    let probe = window.shifted(dy, dx);
    let (rh, rw) = reference.dim();
    if !probe.fits_in(frame.dim()) || probe.height() != rh || probe.width() != rw {
        return f64::INFINITY;
    }

    let stride = stride.max(1);
    let (y0, x0) = (probe.y_low as usize, probe.x_low as usize);
    let mut sum = 0.0f64;
    for row in (0..rh).step_by(stride) {
        for col in (0..rw).step_by(stride) {
            sum += (reference[[row, col]] - frame[[y0 + row, x0 + col]]).abs() as f64;
        }
    }
    sum
}

/// Fitting matrix of the paraboloid `a x² + b y² + c xy + d x + e y + g`
/// over a row-major 3x3 neighborhood (rows are y = -1, 0, 1).
const PARABOLOID_FIT: [[f64; 9]; 6] = [
    [1. / 6., -1. / 3., 1. / 6., 1. / 6., -1. / 3., 1. / 6., 1. / 6., -1. / 3., 1. / 6.],
    [1. / 6., 1. / 6., 1. / 6., -1. / 3., -1. / 3., -1. / 3., 1. / 6., 1. / 6., 1. / 6.],
    [0.25, 0., -0.25, 0., 0., 0., -0.25, 0., 0.25],
    [-1. / 6., 0., 1. / 6., -1. / 6., 0., 1. / 6., -1. / 6., 0., 1. / 6.],
    [-1. / 6., -1. / 6., -1. / 6., 0., 0., 0., 1. / 6., 1. / 6., 1. / 6.],
    [-1. / 9., 2. / 9., -1. / 9., 2. / 9., 5. / 9., 2. / 9., -1. / 9., 2. / 9., -1. / 9.],
];

/// Location `(y, x)` of the extremum of the paraboloid fitted to a 3x3
/// neighborhood, relative to its center.
pub fn sub_pixel_solve(values: &[[f64; 3]; 3]) -> Result<(f64, f64)> {
    let flat: Vec<f64> = values.iter().flatten().copied().collect();
    let mut coeffs = [0.0f64; 6];
    for (c, row) in coeffs.iter_mut().zip(PARABOLOID_FIT.iter()) {
        *c = row.iter().zip(&flat).map(|(m, v)| m * v).sum();
    }
    let [a, b, c, d, e, _g] = coeffs;

    let denominator = c * c - 4.0 * a * b;
    if denominator.abs() > EPSILON && a.abs() > EPSILON {
        let y = (2.0 * a * e - c * d) / denominator;
        let x = (-c * y - d) / (2.0 * a);
        Ok((y, x))
    } else if denominator.abs() > EPSILON && c.abs() > EPSILON {
        let y = (2.0 * a * e - c * d) / denominator;
        let x = (-2.0 * b * y - e) / c;
        Ok((y, x))
    } else {
        Err(StackError::DivideByZero)
    }
}

/// 3x3 neighborhood of `table` centered at `(row, col)`.
pub(crate) fn neighborhood(table: &Array2<f64>, row: usize, col: usize) -> Option<[[f64; 3]; 3]> {
    let (h, w) = table.dim();
    if row == 0 || col == 0 || row + 1 >= h || col + 1 >= w {
        return None;
    }
    let mut out = [[0.0; 3]; 3];
    for (dy, out_row) in out.iter_mut().enumerate() {
        for (dx, v) in out_row.iter_mut().enumerate() {
            *v = table[[row + dy - 1, col + dx - 1]];
        }
    }
    Some(out)
}

/// Ring-by-ring search for the shift minimizing the deviation.
///
/// Rings of growing radius around `(0, 0)` are evaluated until a ring fails
/// to improve on the best deviation so far; the best position of the
/// previous ring is the result. With `sub_pixel`, a paraboloid fit over the
/// surrounding deviations refines the position if the correction stays
/// below one pixel.
pub fn search_local_match(
    reference: ArrayView2<f32>,
    frame: ArrayView2<f32>,
    window: Window,
    search_width: usize,
    sampling_stride: usize,
    sub_pixel: bool,
) -> std::result::Result<LocalShift, SearchFailure> {
    let sw = search_width as isize;
    let center = deviation(reference, frame, window, 0, 0, sampling_stride);
    if !center.is_finite() {
        return Err(SearchFailure::OutsideFrame);
    }

    let side = 2 * search_width + 1;
    let mut deviations = Array2::<f64>::from_elem((side, side), UNSET_DEVIATION);
    let mut deviation_min = f64::INFINITY;
    let (mut dy_min, mut dx_min) = (0isize, 0isize);
    let mut dev_r = Vec::with_capacity(search_width + 1);

    for r in 0..=sw {
        let mut ring_min = f64::INFINITY;
        let (mut ring_dy, mut ring_dx) = (0isize, 0isize);
        for (dy, dx) in circle_around(0, 0, r) {
            let value = if r == 0 {
                center
            } else {
                deviation(reference, frame, window, dy, dx, sampling_stride)
            };
            if value < ring_min {
                ring_min = value;
                ring_dy = dy;
                ring_dx = dx;
            }
            deviations[[(dy + sw) as usize, (dx + sw) as usize]] = value;
        }
        dev_r.push(ring_min);

        if ring_min >= deviation_min {
            let mut shift = LocalShift::integer(dy_min, dx_min, dev_r);
            if sub_pixel {
                let (y_corr, x_corr) =
                    neighborhood(&deviations, (dy_min + sw) as usize, (dx_min + sw) as usize)
                        .and_then(|n| sub_pixel_solve(&n).ok())
                        .unwrap_or((0.0, 0.0));
                if y_corr.abs() < 1.0 && x_corr.abs() < 1.0 {
                    shift.dy += y_corr as f32;
                    shift.dx += x_corr as f32;
                }
            }
            return Ok(shift);
        }
        deviation_min = ring_min;
        dy_min = ring_dy;
        dx_min = ring_dx;
    }

    Err(SearchFailure::NotConverged)
}

/// Steepest-descent search for the shift minimizing the deviation.
///
/// Starting at `(0, 0)`, the radius-1 ring around the current optimum is
/// evaluated and the optimum moves to the best ring point until no ring point
/// improves. Deviations are memoized, so overlapping rings are not
/// re-evaluated.
pub fn search_local_match_gradient(
    reference: ArrayView2<f32>,
    frame: ArrayView2<f32>,
    window: Window,
    search_width: usize,
    sampling_stride: usize,
) -> std::result::Result<LocalShift, SearchFailure> {
    let sw = search_width as isize;
    let side = 2 * search_width + 1;
    let mut dev_table = Array2::<f64>::from_elem((side, side), UNSET_DEVIATION);

    let mut deviation_min = deviation(reference, frame, window, 0, 0, sampling_stride);
    if !deviation_min.is_finite() {
        return Err(SearchFailure::OutsideFrame);
    }
    dev_table[[search_width, search_width]] = deviation_min;
    let (mut dy_min, mut dx_min) = (0isize, 0isize);
    let mut dev_r = vec![deviation_min];

    while dy_min.abs().max(dx_min.abs()) < sw - 1 {
        let mut step_min = f64::INFINITY;
        let (mut step_dy, mut step_dx) = (dy_min, dx_min);
        for (dy, dx) in circle_around(dy_min, dx_min, 1) {
            let cell = [(dy + sw) as usize, (dx + sw) as usize];
            let mut value = dev_table[cell];
            if value >= UNSET_DEVIATION {
                value = deviation(reference, frame, window, dy, dx, sampling_stride);
                dev_table[cell] = value;
            }
            if value < step_min {
                step_min = value;
                step_dy = dy;
                step_dx = dx;
            }
        }
        dev_r.push(step_min);

        if step_min >= deviation_min {
            return Ok(LocalShift::integer(dy_min, dx_min, dev_r));
        }
        deviation_min = step_min;
        dy_min = step_dy;
        dx_min = step_dx;
    }

    Err(SearchFailure::NotConverged)
}
