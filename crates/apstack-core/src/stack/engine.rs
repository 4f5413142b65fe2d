use std::sync::Arc;

use ndarray::{s, Array2, Array3, Axis, Zip};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::consts::{BRIGHTNESS_EPSILON, HOLE_WEIGHT_THRESHOLD, PARALLEL_FRAME_THRESHOLD, WEIGHT_SUM_FLOOR};
use crate::error::{Result, StackError};
use crate::frame::{BitDepth, Rect};
use crate::pipeline::config::{SearchMethod, StackConfig, StackingConfig};
use crate::pipeline::{PhaseProgress, PipelinePhase, ProgressReporter};
use crate::quality::ranking::median;
use crate::quality::FrameRanking;
use crate::source::FrameSource;

use super::ap_grid::{compute_shift_alignment_point, AlignmentPoint, AlignmentPoints};
use super::blend::{one_dim_weight, patch_weights};
use super::drizzle::{equalize_ap_patch, halve, remap_rigid_drizzled, upsample_nearest};
use super::remap::remap_rigid;

/// Distribution of local shift magnitudes and failed shift measurements.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShiftStatistics {
    /// Count per rounded shift magnitude in pixels.
    pub distribution: Vec<usize>,
    pub failures: usize,
}

impl ShiftStatistics {
    pub fn new(search_width: usize) -> Self {
        Self {
            distribution: vec![0; 2 * search_width],
            failures: 0,
        }
    }

    /// Record one measurement; `None` marks a failed search.
    pub fn record(&mut self, magnitude: Option<f32>) {
        match magnitude {
            Some(m) if !self.distribution.is_empty() => {
                let bin = (m.round().max(0.0) as usize).min(self.distribution.len() - 1);
                self.distribution[bin] += 1;
            }
            Some(_) => {}
            None => self.failures += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.distribution.iter().sum::<usize>() + self.failures
    }

    /// Share of failed measurements in percent, rounded to three decimals.
    /// `-1` if nothing was measured.
    pub fn failure_percent(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return -1.0;
        }
        (100.0 * self.failures as f64 / total as f64 * 1000.0).round() / 1000.0
    }

    /// Three-line table of the shift distribution in percent, up to the last
    /// non-empty bin, followed by the failure rate. Empty if no successful
    /// shift was measured.
    pub fn shift_table(&self) -> String {
        let Some(last) = self.distribution.iter().rposition(|&c| c > 0) else {
            return String::new();
        };
        let total = self.total() as f64;
        let bins = &self.distribution[..=last];
        let shifts: String = (0..bins.len()).map(|index| format!("|{:7} ", index)).collect();
        let line = "-".repeat(9 * bins.len());
        let percent: String = bins
            .iter()
            .map(|&count| format!("|{:7.3} ", 100.0 * count as f64 / total))
            .collect();
        format!(
            "           Shift (pixels):{}|\n           ---------------{}-\n           Percent:       {}|\n\n           Failed shift measurements: {:7.3} %",
            shifts,
            line,
            percent,
            self.failure_percent()
        )
    }
}

/// Brightness cut-off for frame normalization on the native sample scale.
pub(crate) fn normalization_threshold(config: &StackConfig, bit_depth: BitDepth) -> f32 {
    match bit_depth {
        BitDepth::Eight => config.frames.normalization_threshold,
        BitDepth::Sixteen => config.frames.normalization_threshold * 256.0,
    }
}

/// Stacks the best frames at every alignment point and merges the point
/// buffers into the final image.
pub struct StackEngine<'a> {
    source: &'a dyn FrameSource,
    ranking: &'a FrameRanking,
    offsets: &'a [[isize; 2]],
    config: StackingConfig,
    search_method: SearchMethod,
    de_warp: bool,
    ap_search_width: usize,
    /// Per-frame brightness scale, present with brightness normalization.
    brightness_scale: Option<Vec<f32>>,
    shape: (usize, usize),
    channels: usize,
    stack_size: usize,
    sum_single_frame_weights: Array2<f32>,
    number_stacking_holes: usize,
    /// Tiles restricting the background; `None` means the full frame.
    background_patches: Option<Vec<Rect>>,
    averaged_background: Option<Array3<f32>>,
    statistics: ShiftStatistics,
    drizzle_holes: usize,
}

impl<'a> StackEngine<'a> {
    /// `offsets[i]` is the mean-frame origin inside frame `i`; `shape` is the
    /// mean-frame shape.
    pub fn new(
        source: &'a dyn FrameSource,
        ranking: &'a FrameRanking,
        offsets: &'a [[isize; 2]],
        shape: (usize, usize),
        config: &StackConfig,
    ) -> Result<Self> {
        let total = source.count();
        if offsets.len() != total || ranking.len() != total {
            return Err(StackError::Argument(format!(
                "{} frames, but {} offsets and {} ranks",
                total,
                offsets.len(),
                ranking.len()
            )));
        }

        let brightness_scale = if config.frames.normalization {
            let threshold = normalization_threshold(config, source.bit_depth());
            let brightness = match &ranking.average_brightness {
                Some(values) => values.clone(),
                None => (0..total)
                    .map(|i| source.average_brightness(i, threshold))
                    .collect::<Result<Vec<_>>>()?,
            };
            let median_value = ranking.median_brightness.unwrap_or_else(|| median(&brightness));
            Some(
                brightness
                    .iter()
                    .map(|b| (median_value / (b + BRIGHTNESS_EPSILON)) as f32)
                    .collect(),
            )
        } else {
            None
        };

        Ok(Self {
            source,
            ranking,
            offsets,
            config: config.stack.clone(),
            search_method: config.alignment_points.method,
            de_warp: config.alignment_points.de_warp,
            ap_search_width: config.alignment_points.search_width,
            brightness_scale,
            shape,
            channels: if source.is_color() { 3 } else { 1 },
            stack_size: 0,
            sum_single_frame_weights: Array2::zeros(shape),
            number_stacking_holes: 0,
            background_patches: None,
            averaged_background: None,
            statistics: ShiftStatistics::default(),
            drizzle_holes: 0,
        })
    }

    pub fn statistics(&self) -> &ShiftStatistics {
        &self.statistics
    }

    /// Pixels not covered by any alignment point patch.
    pub fn number_stacking_holes(&self) -> usize {
        self.number_stacking_holes
    }

    pub fn background_patches(&self) -> Option<&[Rect]> {
        self.background_patches.as_deref()
    }

    pub fn sum_single_frame_weights(&self) -> &Array2<f32> {
        &self.sum_single_frame_weights
    }

    pub fn averaged_background(&self) -> Option<&Array3<f32>> {
        self.averaged_background.as_ref()
    }

    /// Empty drizzle buckets filled from their neighbors, over all points.
    pub fn drizzle_holes(&self) -> usize {
        self.drizzle_holes
    }

    /// Upper estimate in bytes of the buffers allocated by stacking and
    /// merging: drizzled point buffers, point weights, the weight sum, the
    /// background image and the output image in float and 16-bit form.
    pub fn required_buffer_bytes(&self, points: &AlignmentPoints) -> u64 {
        let factor = self.config.drizzle.factor() as u64;
        let channels = self.channels as u64;
        let float = std::mem::size_of::<f32>() as u64;
        let (h, w) = (self.shape.0 as u64, self.shape.1 as u64);

        let per_point: u64 = points
            .points
            .iter()
            .map(|p| {
                let area = (p.patch_bounds.height() * p.patch_bounds.width()) as u64;
                area * factor * factor * channels * float + area * float
            })
            .sum();
        let weight_sum = h * w * float;
        let background = h * w * channels * float;
        let output_pixels = h * w * factor * factor * channels;
        let output = output_pixels * float + output_pixels * std::mem::size_of::<u16>() as u64;
        per_point + weight_sum + background + output
    }

    /// Fail with [`StackError::MemoryBudgetExceeded`] if the stacking buffers
    /// would not fit into `stack.max_memory_gb`.
    pub fn check_memory_budget(&self, points: &AlignmentPoints) -> Result<()> {
        let Some(gb) = self.config.max_memory_gb else {
            return Ok(());
        };
        let budget = (gb * 1e9) as u64;
        let required = self.required_buffer_bytes(points);
        debug!(required, budget, "Stacking buffer estimate");
        if required > budget {
            return Err(StackError::MemoryBudgetExceeded { required, budget });
        }
        Ok(())
    }

    /// Allocate point buffers and blend weights and find the pixels that
    /// need a background image.
    pub fn prepare_for_stack_blending(&mut self, points: &mut AlignmentPoints) -> Result<()> {
        if points.shape() != self.shape {
            return Err(StackError::Argument(format!(
                "alignment points live on a {:?} frame, expected {:?}",
                points.shape(),
                self.shape
            )));
        }
        self.stack_size = points.stack_size();
        if self.stack_size == 0 {
            return Err(StackError::WrongOrdering(
                "frame qualities at alignment points must be computed before stacking".into(),
            ));
        }

        let factor = self.config.drizzle.factor();
        let stack_size = self.stack_size as f32;
        let mut sum_weights = Array2::<f32>::from_elem(self.shape, WEIGHT_SUM_FLOOR);
        for point in &mut points.points {
            let patch = point.patch_bounds;
            let (ext_y_low, ext_y_high, ext_x_low, ext_x_high) = point.extended_sides(self.shape);
            let weights_y = one_dim_weight(patch.y_low, patch.y_high, point.y, ext_y_low, ext_y_high);
            let weights_x = one_dim_weight(patch.x_low, patch.x_high, point.x, ext_x_low, ext_x_high);
            let weights = patch_weights(&weights_y, &weights_x);

            let mut region = sum_weights.slice_mut(s![patch.y_low..patch.y_high, patch.x_low..patch.x_high]);
            region.scaled_add(stack_size, &weights);

            point.weights_yx = Some(weights);
            point.stacking_buffer = Some(Array3::zeros((
                patch.height() * factor,
                patch.width() * factor,
                self.channels,
            )));
            point.drizzle_counters = (factor > 1).then(|| Array2::zeros((factor, factor)));
        }

        self.number_stacking_holes = sum_weights.iter().filter(|&&v| v < HOLE_WEIGHT_THRESHOLD).count();
        self.sum_single_frame_weights = sum_weights;
        self.background_patches = None;
        self.averaged_background = None;
        if self.number_stacking_holes == 0 {
            debug!("Alignment point patches cover the whole frame");
            return Ok(());
        }

        let (h, w) = self.shape;
        self.averaged_background = Some(Array3::zeros((h, w, self.channels)));
        let blend_limit = self.config.blend_threshold * stack_size;
        let background_used = self
            .sum_single_frame_weights
            .iter()
            .filter(|&&v| v < blend_limit)
            .count();

        if (background_used as f64 / (h * w) as f64) < self.config.background_fraction {
            let size = self.config.background_patch_size.max(1);
            let mut tiles = Vec::new();
            for y_low in (0..h).step_by(size) {
                let y_high = (y_low + size).min(h - 1);
                if y_high <= y_low {
                    continue;
                }
                for x_low in (0..w).step_by(size) {
                    let x_high = (x_low + size).min(w - 1);
                    if x_high <= x_low {
                        continue;
                    }
                    let needed = self
                        .sum_single_frame_weights
                        .slice(s![y_low..y_high, x_low..x_high])
                        .iter()
                        .any(|&v| v < blend_limit);
                    if needed {
                        tiles.push(Rect::new(y_low, y_high, x_low, x_high));
                    }
                }
            }
            self.background_patches = Some(tiles);
        }

        debug!(
            holes = self.number_stacking_holes,
            background_tiles = self.background_patches.as_ref().map(Vec::len),
            "Prepared background blending"
        );
        Ok(())
    }

    /// Add every frame to the buffers of the points that selected it, after
    /// de-warping it locally, and accumulate the background image.
    pub fn stack_frames(&mut self, points: &mut AlignmentPoints, reporter: &dyn ProgressReporter) -> Result<()> {
        self.prepare_for_stack_blending(points)?;
        if self.search_method == SearchMethod::MultiLevelCorrelation {
            points.set_reference_boxes_correlation();
        }

        let total = self.source.count();
        let factor = self.config.drizzle.factor();
        let de_warp = self.de_warp;
        let mut in_background = vec![false; total];
        for &index in self.ranking.best_indices(self.stack_size) {
            in_background[index] = true;
        }
        self.statistics = ShiftStatistics::new(self.ap_search_width);

        info!(
            total_frames = total,
            alignment_points = points.len(),
            stack_size = self.stack_size,
            drizzle = %self.config.drizzle,
            "Stacking frames"
        );
        let progress = PhaseProgress::new(reporter, PipelinePhase::StackFrames, total);
        let (params, aps, used_alignment_points) = points.stacking_view(factor);

        for frame_index in 0..total {
            let used = &used_alignment_points[frame_index];
            let background = self.averaged_background.is_some() && in_background[frame_index];
            if used.is_empty() && !background {
                progress.advance()?;
                continue;
            }

            let mut frame = self.source.frame(frame_index)?;
            if let Some(scales) = &self.brightness_scale {
                let scale = scales[frame_index];
                frame = Arc::new(frame.mapv(|v| v * scale));
            }
            let blurred = self.source.frame_mono_blurred(frame_index)?;
            let [dy, dx] = self.offsets[frame_index];

            let mut selected = vec![false; aps.len()];
            for &ap_index in used {
                selected[ap_index] = true;
            }
            let stack_point = |point: &mut AlignmentPoint| -> Option<f32> {
                let shift = compute_shift_alignment_point(blurred.view(), point, [dy, dx], &params, de_warp);
                let (shift_y, shift_x, magnitude) = match shift {
                    Ok(s) => (s.dy, s.dx, Some(s.dy.hypot(s.dx))),
                    Err(_) => (0.0, 0.0, None),
                };
                let patch = point.patch_bounds;
                let total_y = dy as f32 - shift_y;
                let total_x = dx as f32 - shift_x;
                if factor == 1 {
                    if let Some(buffer) = point.stacking_buffer.as_mut() {
                        remap_rigid(&frame, buffer, total_y.round() as isize, total_x.round() as isize, patch);
                    }
                } else if let (Some(buffer), Some(counters)) =
                    (point.stacking_buffer.as_mut(), point.drizzle_counters.as_mut())
                {
                    remap_rigid_drizzled(&frame, buffer, counters, total_y, total_x, patch, factor);
                }
                magnitude
            };

            let outcomes: Vec<Option<f32>> = if used.len() >= PARALLEL_FRAME_THRESHOLD {
                aps.par_iter_mut()
                    .enumerate()
                    .filter(|(i, _)| selected[*i])
                    .map(|(_, point)| stack_point(point))
                    .collect()
            } else {
                aps.iter_mut()
                    .enumerate()
                    .filter(|(i, _)| selected[*i])
                    .map(|(_, point)| stack_point(point))
                    .collect()
            };
            for outcome in outcomes {
                self.statistics.record(outcome);
            }

            if background {
                self.accumulate_background(&frame, dy, dx);
            }
            progress.advance()?;
        }

        if let Some(background) = self.averaged_background.as_mut() {
            let stack_size = self.stack_size as f32;
            background.mapv_inplace(|v| v / stack_size);
        }

        self.drizzle_holes = 0;
        if factor > 1 {
            for point in aps.iter_mut() {
                if let (Some(buffer), Some(counters)) = (point.stacking_buffer.as_mut(), point.drizzle_counters.as_ref()) {
                    self.drizzle_holes += equalize_ap_patch(buffer, counters, self.stack_size, factor);
                }
            }
            if self.drizzle_holes > 0 {
                warn!(holes = self.drizzle_holes, "Filled empty drizzle buckets from neighbors");
            }
        }
        progress.finish();

        info!(
            failure_percent = self.statistics.failure_percent(),
            measurements = self.statistics.total(),
            "Frame stacking complete"
        );
        Ok(())
    }

    fn accumulate_background(&mut self, frame: &Array3<f32>, dy: isize, dx: isize) {
        let Some(background) = self.averaged_background.as_mut() else {
            return;
        };
        let (h, w) = self.shape;
        let full = [Rect::new(0, h, 0, w)];
        let tiles: &[Rect] = match &self.background_patches {
            Some(tiles) => tiles,
            None => &full,
        };
        for tile in tiles {
            let y0 = (tile.y_low as isize + dy) as usize;
            let x0 = (tile.x_low as isize + dx) as usize;
            let mut target = background.slice_mut(s![tile.y_low..tile.y_high, tile.x_low..tile.x_high, ..]);
            target += &frame.slice(s![y0..y0 + tile.height(), x0..x0 + tile.width(), ..]);
        }
    }

    /// Blend all point buffers into the stacked image, fill uncovered pixels
    /// from the background and convert to 16 bits. Repeated calls give the
    /// same result.
    pub fn merge_alignment_point_buffers(
        &self,
        points: &AlignmentPoints,
        reporter: &dyn ProgressReporter,
    ) -> Result<Array3<u16>> {
        let progress = PhaseProgress::new(reporter, PipelinePhase::MergeBuffers, points.len());
        let factor = self.config.drizzle.factor();
        let (h, w) = self.shape;
        let mut stacked = Array3::<f32>::zeros((h * factor, w * factor, self.channels));

        for point in &points.points {
            let (Some(buffer), Some(weights)) = (point.stacking_buffer.as_ref(), point.weights_yx.as_ref()) else {
                return Err(StackError::WrongOrdering(
                    "alignment point buffers must be stacked before merging".into(),
                ));
            };
            let weights = upsample_nearest(weights, factor);
            let patch = point.patch_bounds;
            let mut target = stacked.slice_mut(s![
                patch.y_low * factor..patch.y_high * factor,
                patch.x_low * factor..patch.x_high * factor,
                ..
            ]);
            for (mut out, src) in target.axis_iter_mut(Axis(2)).zip(buffer.axis_iter(Axis(2))) {
                Zip::from(&mut out)
                    .and(&src)
                    .and(&weights)
                    .for_each(|o, &b, &wgt| *o += b * wgt);
            }
            progress.advance()?;
        }

        let blend_limit = self.config.blend_threshold * self.stack_size as f32;
        let background = if self.number_stacking_holes > 0 {
            self.averaged_background.as_ref()
        } else {
            None
        };
        for ((y, x, c), value) in stacked.indexed_iter_mut() {
            let weight_sum = self.sum_single_frame_weights[[y / factor, x / factor]];
            *value /= weight_sum;
            if let Some(background) = background {
                let bg = background[[y / factor, x / factor, c]];
                let foreground = (weight_sum / blend_limit).clamp(0.0, 1.0);
                *value = (*value - bg) * foreground + bg;
            }
        }

        if self.config.drizzle.is_one_and_a_half() {
            stacked = halve(&stacked);
        }
        progress.finish();

        let max_value = self.source.bit_depth().max_value();
        Ok(stacked.mapv(|v| ((v / max_value).clamp(0.0, 1.0) * 65535.0).round() as u16))
    }
}
