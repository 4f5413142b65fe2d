use ndarray::{s, Array2, Array3, ArrayView2};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::align::correlation::weight_matrix_first_phase;
use crate::align::{compute_shift_configured, LocalShift, SearchFailure, SearchParams, SearchReference, Window};
use crate::consts::PARALLEL_FRAME_THRESHOLD;
use crate::error::{Result, StackError};
use crate::filters::gaussian_blur::gaussian_blur_width;
use crate::frame::Rect;
use crate::pipeline::config::{AlignmentPointsConfig, RankMethod};
use crate::pipeline::{PhaseProgress, PipelinePhase, ProgressReporter};
use crate::quality::gradient::quality_measure;
use crate::quality::laplacian::std_dev;
use crate::quality::ranking::sorted_descending;
use crate::quality::score_with_method;
use crate::source::FrameSource;

/// A single alignment point: a small box used to measure local warp and the
/// larger patch it contributes to the stacked image.
#[derive(Clone, Debug)]
pub struct AlignmentPoint {
    /// Center row in mean-frame coordinates.
    pub y: usize,
    /// Center column in mean-frame coordinates.
    pub x: usize,
    pub half_box_width: usize,
    /// Search box.
    pub box_bounds: Rect,
    /// Stacking area. Reaches the frame border for first/last rows and columns.
    pub patch_bounds: Rect,
    pub structure: f64,
    /// Box cut from the blurred mean frame.
    pub reference_box: Array2<f32>,
    /// Stride-2, blurred reference box for the coarse correlation phase.
    pub reference_box_first_phase: Option<Array2<f32>>,
    /// Local sharpness of every frame at this point.
    pub frame_qualities: Vec<f64>,
    /// Frames stacked at this point, best first.
    pub best_frame_indices: Vec<usize>,
    /// Accumulated patch, shape `(patch_h * f, patch_w * f, channels)`.
    pub stacking_buffer: Option<Array3<f32>>,
    /// Contributions per drizzle sub-pixel offset, shape `(f, f)`.
    pub drizzle_counters: Option<Array2<u32>>,
    /// Blend weights over the patch.
    pub weights_yx: Option<Array2<f32>>,
}

impl AlignmentPoint {
    /// Whether the patch touches the frame border on `(y_low, y_high, x_low, x_high)`.
    pub fn extended_sides(&self, shape: (usize, usize)) -> (bool, bool, bool, bool) {
        (
            self.patch_bounds.y_low == 0,
            self.patch_bounds.y_high == shape.0,
            self.patch_bounds.x_low == 0,
            self.patch_bounds.x_high == shape.1,
        )
    }
}

/// Which patch sides of a new point reach the frame border.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatchExtension {
    pub y_low: bool,
    pub y_high: bool,
    pub x_low: bool,
    pub x_high: bool,
}

/// Coordinates of AP centers along one axis of the staggered grid.
///
/// Odd rows hold `ceil((n - 2 * mbd) / step)` points spread evenly between
/// the boundary distances, even rows one more, shifted by half a spacing.
pub fn ap_locations(
    num_pixels: usize,
    min_boundary_distance: usize,
    step_size: usize,
    even: bool,
) -> Result<Vec<usize>> {
    let interior = num_pixels as f64 - 2.0 * min_boundary_distance as f64;
    let num_odd = if interior > 0.0 && step_size > 0 {
        (interior / step_size as f64).ceil() as usize
    } else {
        0
    };
    if num_odd == 0 {
        return Err(StackError::Argument(format!(
            "{} pixels leave no room for alignment points at boundary distance {}",
            num_pixels, min_boundary_distance
        )));
    }

    let distance = interior / num_odd as f64;
    let mbd = min_boundary_distance as f64;
    let locations = if even {
        (0..=num_odd)
            .map(|i| (mbd + i as f64 * distance) as usize)
            .collect()
    } else {
        (0..num_odd)
            .map(|i| (mbd + 0.5 * distance + i as f64 * distance) as usize)
            .collect()
    };
    Ok(locations)
}

/// Arena of alignment points on one mean frame, together with the per-frame
/// reverse index used by stacking.
pub struct AlignmentPoints {
    config: AlignmentPointsConfig,
    gauss_width: usize,
    /// Blurred mean frame on which boxes are cut.
    mean_frame: Array2<f32>,
    half_box_width: usize,
    half_patch_width: usize,
    step_size: usize,
    min_boundary_distance: usize,
    pub points: Vec<AlignmentPoint>,
    pub dropped_dim: usize,
    pub dropped_structure: usize,
    stack_size: usize,
    /// For every frame, the indices of the points stacking it.
    used_alignment_points: Vec<Vec<usize>>,
    weight_matrix_first_phase: Option<Array2<f32>>,
}

impl AlignmentPoints {
    /// `mean_frame` is the (ROI-restricted) mean frame on the 16-bit working
    /// scale; it is blurred with `gauss_width` before boxes are cut.
    pub fn new(mean_frame: &Array2<f32>, config: AlignmentPointsConfig, gauss_width: usize) -> Self {
        let half_box_width = config.half_box_width;
        let half_patch_width = config.half_patch_width();
        let step_size = config.step_size();
        let min_boundary_distance = (half_box_width + config.search_width).max(half_patch_width);
        Self {
            mean_frame: gaussian_blur_width(mean_frame, gauss_width),
            gauss_width,
            half_box_width,
            half_patch_width,
            step_size,
            min_boundary_distance,
            points: Vec::new(),
            dropped_dim: 0,
            dropped_structure: 0,
            stack_size: 0,
            used_alignment_points: Vec::new(),
            weight_matrix_first_phase: None,
            config,
        }
    }

    pub fn config(&self) -> &AlignmentPointsConfig {
        &self.config
    }

    /// Shape of the mean frame the points live on.
    pub fn shape(&self) -> (usize, usize) {
        self.mean_frame.dim()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn half_patch_width(&self) -> usize {
        self.half_patch_width
    }

    pub fn min_boundary_distance(&self) -> usize {
        self.min_boundary_distance
    }

    /// Number of frames stacked per point; set by
    /// [`AlignmentPoints::compute_frame_qualities`].
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn used_alignment_points(&self) -> &[Vec<usize>] {
        &self.used_alignment_points
    }

    pub fn weight_matrix_first_phase(&self) -> Option<&Array2<f32>> {
        self.weight_matrix_first_phase.as_ref()
    }

    /// Lay out the staggered grid and keep the points with enough
    /// brightness, contrast and structure.
    pub fn create_ap_grid(&mut self) -> Result<()> {
        let (h, w) = self.shape();
        let mbd = self.min_boundary_distance;
        let locations_y = ap_locations(h, mbd, self.step_size, true)?;
        let locations_x_even = ap_locations(w, mbd, self.step_size, true)?;
        let locations_x_odd = ap_locations(w, mbd, self.step_size, false)?;

        let brightness_threshold = self.config.brightness_threshold * 256.0;
        let contrast_threshold = self.config.contrast_threshold * 256.0;
        self.points.clear();
        self.dropped_dim = 0;
        self.dropped_structure = 0;
        self.stack_size = 0;
        self.used_alignment_points.clear();

        for (row, &y) in locations_y.iter().enumerate() {
            let locations_x = if row % 2 == 0 {
                &locations_x_even
            } else {
                &locations_x_odd
            };
            for (col, &x) in locations_x.iter().enumerate() {
                let extension = PatchExtension {
                    y_low: row == 0,
                    y_high: row + 1 == locations_y.len(),
                    x_low: col == 0,
                    x_high: col + 1 == locations_x.len(),
                };
                let Some(mut point) = self.new_alignment_point(y, x, extension) else {
                    continue;
                };

                let (min, max) = point
                    .reference_box
                    .iter()
                    .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
                if !(max > brightness_threshold && max - min > contrast_threshold) {
                    self.dropped_dim += 1;
                    continue;
                }

                let dim_pixels = point
                    .reference_box
                    .iter()
                    .filter(|&&v| v < brightness_threshold)
                    .count();
                let dim_fraction = dim_pixels as f64 / point.reference_box.len() as f64;
                if dim_fraction > self.config.dim_fraction_threshold {
                    if let Some((com_y, com_x)) = center_of_mass(point.reference_box.view()) {
                        let y_new = (y as isize + com_y as isize - self.half_box_width as isize)
                            .clamp(mbd as isize, (h - mbd) as isize) as usize;
                        let x_new = (x as isize + com_x as isize - self.half_box_width as isize)
                            .clamp(mbd as isize, (w - mbd) as isize) as usize;
                        if let Some(moved) = self.new_alignment_point(y_new, x_new, extension) {
                            point = moved;
                        }
                    }
                }

                point.structure = quality_measure(point.reference_box.view());
                self.points.push(point);
            }
        }

        let structure_max = self
            .points
            .iter()
            .map(|p| p.structure)
            .fold(0.0f64, f64::max);
        if structure_max > 0.0 {
            for point in &mut self.points {
                point.structure /= structure_max;
            }
        }
        let before = self.points.len();
        let threshold = self.config.structure_threshold;
        self.points.retain(|p| p.structure >= threshold);
        self.dropped_structure = before - self.points.len();

        info!(
            alignment_points = self.points.len(),
            dropped_dim = self.dropped_dim,
            dropped_structure = self.dropped_structure,
            "Created alignment point grid"
        );
        Ok(())
    }

    /// Build a point centered at `(y, x)`, or `None` if the center is closer
    /// to the frame border than the minimum boundary distance.
    pub fn new_alignment_point(&self, y: usize, x: usize, extension: PatchExtension) -> Option<AlignmentPoint> {
        let (h, w) = self.shape();
        let mbd = self.min_boundary_distance;
        if y < mbd || x < mbd || y + mbd > h || x + mbd > w {
            return None;
        }

        let hbw = self.half_box_width;
        let hpw = self.half_patch_width;
        let box_bounds = Rect::new(y - hbw, y + hbw, x - hbw, x + hbw);
        let patch_bounds = Rect::new(
            if extension.y_low { 0 } else { y - hpw },
            if extension.y_high { h } else { y + hpw },
            if extension.x_low { 0 } else { x - hpw },
            if extension.x_high { w } else { x + hpw },
        );
        let reference_box = self
            .mean_frame
            .slice(s![box_bounds.y_low..box_bounds.y_high, box_bounds.x_low..box_bounds.x_high])
            .to_owned();

        Some(AlignmentPoint {
            y,
            x,
            half_box_width: hbw,
            box_bounds,
            patch_bounds,
            structure: 0.0,
            reference_box,
            reference_box_first_phase: None,
            frame_qualities: Vec::new(),
            best_frame_indices: Vec::new(),
            stacking_buffer: None,
            drizzle_counters: None,
            weights_yx: None,
        })
    }

    pub fn add_alignment_point(&mut self, point: AlignmentPoint) {
        self.points.push(point);
    }

    /// Remove the points at `indices`. Unknown indices are ignored; the
    /// remaining points keep their order.
    pub fn remove_alignment_points(&mut self, indices: &[usize]) {
        let mut index = 0;
        self.points.retain(|_| {
            let keep = !indices.contains(&index);
            index += 1;
            keep
        });
    }

    /// Replace the point at `index`. Returns `false` if there is none.
    pub fn replace_alignment_point(&mut self, index: usize, point: AlignmentPoint) -> bool {
        match self.points.get_mut(index) {
            Some(slot) => {
                *slot = point;
                true
            }
            None => false,
        }
    }

    /// Indices of all points whose centers lie within the inclusive bounds.
    pub fn find_alignment_points(&self, y_low: usize, y_high: usize, x_low: usize, x_high: usize) -> Vec<usize> {
        self.points
            .iter()
            .enumerate()
            .filter(|(_, p)| (y_low..=y_high).contains(&p.y) && (x_low..=x_high).contains(&p.x))
            .map(|(i, _)| i)
            .collect()
    }

    /// Closest point to `(y, x)` and its distance.
    pub fn find_neighbor(&self, y: usize, x: usize) -> Option<(usize, f64)> {
        self.points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let dy = p.y as f64 - y as f64;
                let dx = p.x as f64 - x as f64;
                (i, dy * dy + dx * dx)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, d2)| (i, d2.sqrt()))
    }

    /// Number of frames stacked at every point.
    pub fn compute_stack_size(&self, total_frames: usize) -> usize {
        let size = match self.config.frame_number {
            Some(number) => number,
            None => (total_frames as f64 * self.config.frame_percent / 100.0).ceil() as usize,
        };
        size.max(1).min(total_frames)
    }

    /// Rank all frames locally at every point and select each point's best
    /// frames.
    ///
    /// `offsets[i]` is the position of the mean-frame origin inside frame `i`.
    /// When both the global ranking and the point ranking use `Laplace`, the
    /// stored strided Laplacians are reused.
    pub fn compute_frame_qualities(
        &mut self,
        source: &dyn FrameSource,
        offsets: &[[isize; 2]],
        frame_rank_method: RankMethod,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let total = source.count();
        if offsets.len() != total {
            return Err(StackError::Argument(format!(
                "{} frame offsets for {} frames",
                offsets.len(),
                total
            )));
        }
        self.stack_size = self.compute_stack_size(total);
        let (h, w) = source.shape();
        let use_laplacian =
            frame_rank_method == RankMethod::Laplace && self.config.rank_method == RankMethod::Laplace;
        let stride = source.laplacian_stride();
        let patches: Vec<Rect> = self.points.iter().map(|p| p.patch_bounds).collect();

        let progress = PhaseProgress::new(reporter, PipelinePhase::RankAlignmentPoints, total);
        let score_frame = |index: usize| -> Result<Vec<f64>> {
            let [dy, dx] = offsets[index];
            let in_frame = |patch: &Rect| {
                let y_low = (patch.y_low as isize + dy).clamp(0, h as isize) as usize;
                let y_high = (patch.y_high as isize + dy).clamp(0, h as isize) as usize;
                let x_low = (patch.x_low as isize + dx).clamp(0, w as isize) as usize;
                let x_high = (patch.x_high as isize + dx).clamp(0, w as isize) as usize;
                (y_low, y_high.max(y_low), x_low, x_high.max(x_low))
            };

            let scores = if use_laplacian {
                let laplacian = source.frame_mono_blurred_laplacian(index)?;
                let (lh, lw) = laplacian.dim();
                patches
                    .iter()
                    .map(|patch| {
                        let (y0, y1, x0, x1) = in_frame(patch);
                        let (y0, y1) = ((y0 / stride).min(lh), (y1 / stride).min(lh));
                        let (x0, x1) = ((x0 / stride).min(lw), (x1 / stride).min(lw));
                        std_dev(laplacian.slice(s![y0..y1.max(y0), x0..x1.max(x0)]))
                    })
                    .collect()
            } else {
                let blurred = source.frame_mono_blurred(index)?;
                patches
                    .iter()
                    .map(|patch| {
                        let (y0, y1, x0, x1) = in_frame(patch);
                        score_with_method(
                            blurred.slice(s![y0..y1, x0..x1]),
                            self.config.rank_method,
                            self.config.rank_pixel_stride,
                        )
                    })
                    .collect()
            };
            progress.advance()?;
            Ok(scores)
        };

        let per_frame: Vec<Vec<f64>> = if total >= PARALLEL_FRAME_THRESHOLD {
            (0..total).into_par_iter().map(score_frame).collect::<Result<_>>()?
        } else {
            (0..total).map(score_frame).collect::<Result<_>>()?
        };

        self.used_alignment_points = vec![Vec::new(); total];
        for (ap_index, point) in self.points.iter_mut().enumerate() {
            point.frame_qualities = per_frame.iter().map(|scores| scores[ap_index]).collect();
            let mut best = sorted_descending(&point.frame_qualities);
            best.truncate(self.stack_size);
            for &frame in &best {
                self.used_alignment_points[frame].push(ap_index);
            }
            point.best_frame_indices = best;
        }
        progress.finish();

        debug!(
            stack_size = self.stack_size,
            alignment_points = self.points.len(),
            laplacian_reused = use_laplacian,
            "Ranked frames at alignment points"
        );
        Ok(())
    }

    /// Prepare coarse reference boxes and the off-center penalty used by
    /// multi-level correlation.
    pub fn set_reference_boxes_correlation(&mut self) {
        for point in &mut self.points {
            let sampled = point.reference_box.slice(s![..;2, ..;2]).to_owned();
            point.reference_box_first_phase = Some(gaussian_blur_width(&sampled, self.gauss_width));
        }
        self.weight_matrix_first_phase = Some(weight_matrix_first_phase(
            self.config.search_width,
            self.config.penalty_factor,
        ));
    }

    /// Search parameters of the local shift measurement. Drizzled stacking
    /// always refines shifts to sub-pixel accuracy.
    pub fn search_params(&self, drizzle_factor: usize) -> SearchParams<'_> {
        local_search_params(
            &self.config,
            self.gauss_width,
            self.weight_matrix_first_phase.as_ref(),
            drizzle_factor,
        )
    }

    /// Split the arena for the stacking loop: shared search parameters,
    /// exclusively borrowed points and the per-frame point lists.
    pub(crate) fn stacking_view(
        &mut self,
        drizzle_factor: usize,
    ) -> (SearchParams<'_>, &mut [AlignmentPoint], &[Vec<usize>]) {
        let params = local_search_params(
            &self.config,
            self.gauss_width,
            self.weight_matrix_first_phase.as_ref(),
            drizzle_factor,
        );
        (params, &mut self.points, &self.used_alignment_points)
    }
}

fn local_search_params<'w>(
    config: &AlignmentPointsConfig,
    gauss_width: usize,
    weight_matrix: Option<&'w Array2<f32>>,
    drizzle_factor: usize,
) -> SearchParams<'w> {
    SearchParams {
        method: config.method,
        search_width: config.search_width,
        sampling_stride: config.sampling_stride,
        sub_pixel: config.local_search_subpixel || drizzle_factor > 1,
        blur_width: gauss_width,
        weight_matrix,
    }
}

/// Local warp shift of one frame at one alignment point, relative to the
/// point's reference box. `offset` is the mean-frame origin inside the frame.
/// Without `de_warp`, the shift is zero.
pub fn compute_shift_alignment_point(
    frame_blurred: ArrayView2<f32>,
    point: &AlignmentPoint,
    offset: [isize; 2],
    params: &SearchParams,
    de_warp: bool,
) -> std::result::Result<LocalShift, SearchFailure> {
    if !de_warp {
        return Ok(LocalShift::integer(0, 0, Vec::new()));
    }
    let window = Window::from(point.box_bounds).shifted(-offset[0], -offset[1]);
    let reference = SearchReference {
        reference: point.reference_box.view(),
        first_phase: point.reference_box_first_phase.as_ref().map(|b| b.view()),
    };
    compute_shift_configured(&reference, frame_blurred, window, params)
}

/// Brightness center of mass `(y, x)` of a box, `None` for an all-zero box.
fn center_of_mass(data: ArrayView2<f32>) -> Option<(f64, f64)> {
    let (mut total, mut sum_y, mut sum_x) = (0.0f64, 0.0f64, 0.0f64);
    for ((y, x), &v) in data.indexed_iter() {
        let v = v as f64;
        total += v;
        sum_y += y as f64 * v;
        sum_x += x as f64 * v;
    }
    if total <= 0.0 {
        return None;
    }
    Some((sum_y / total, sum_x / total))
}
