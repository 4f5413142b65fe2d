use ndarray::{s, Array2};
use tracing::{debug, info, warn};

use crate::error::{Result, StackError};
use crate::frame::{FrameShift, Rect};
use crate::pipeline::config::{AlignConfig, AlignMode, SearchMethod};
use crate::pipeline::{PhaseProgress, PipelinePhase, ProgressReporter};
use crate::quality::gradient::quality_measure_threshold_weighted;
use crate::quality::FrameRanking;
use crate::source::FrameSource;

use super::dispatcher::{compute_shift_configured, SearchParams, SearchReference};
use super::search::Window;

/// Candidate alignment rectangle and its structure score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RectCandidate {
    pub rect: Rect,
    pub quality: f64,
}

/// Running state of one global alignment pass: the (possibly re-centered)
/// alignment rectangle and the shift accumulated since the reference frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlignmentState {
    pub rect: Rect,
    pub cum_dy: isize,
    pub cum_dx: isize,
}

impl AlignmentState {
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            cum_dy: 0,
            cum_dx: 0,
        }
    }

    /// Frame window in which the next frame is searched.
    pub fn window(&self) -> Window {
        Window::from(self.rect).shifted(self.cum_dy, self.cum_dx)
    }

    pub fn reset_cumulative(&mut self) {
        self.cum_dy = 0;
        self.cum_dx = 0;
    }

    /// Fail if the frame cannot hold the rectangle plus the search margins
    /// at the current drift.
    fn check_fit(&self, shape: (usize, usize), search_width: usize, border: usize) -> Result<()> {
        let fits = |dim: usize, cum: isize, extent: usize| {
            dim as isize - cum.abs() - 2 * search_width as isize - border as isize >= extent as isize
        };
        if !fits(shape.0, self.cum_dy, self.rect.height()) || !fits(shape.1, self.cum_dx, self.rect.width()) {
            return Err(StackError::Argument(
                "frame stabilization window does not fit into the frames".into(),
            ));
        }
        Ok(())
    }

    /// Move the rectangle away from frame edges the drifting window came too
    /// close to. Returns whether the rectangle moved.
    fn recenter(&mut self, shape: (usize, usize), search_width: usize, border: usize) -> bool {
        let step = border.div_ceil(2).max(1) as isize;
        let margin = (search_width + border / 2) as isize;
        let (h, w) = (shape.0 as isize, shape.1 as isize);
        let mut moved = false;

        let (mut y_low, mut y_high) = (self.rect.y_low as isize, self.rect.y_high as isize);
        let (mut x_low, mut x_high) = (self.rect.x_low as isize, self.rect.x_high as isize);

        while y_low - self.cum_dy < margin && y_high + step <= h {
            y_low += step;
            y_high += step;
            moved = true;
        }
        while y_high - self.cum_dy > h - margin && y_low - step >= 0 {
            y_low -= step;
            y_high -= step;
            moved = true;
        }
        while x_low - self.cum_dx < margin && x_high + step <= w {
            x_low += step;
            x_high += step;
            moved = true;
        }
        while x_high - self.cum_dx > w - margin && x_low - step >= 0 {
            x_low -= step;
            x_high -= step;
            moved = true;
        }

        if moved {
            self.rect = Rect::new(y_low as usize, y_high as usize, x_low as usize, x_high as usize);
        }
        moved
    }
}

/// Global frame registration: alignment rectangle choice, per-frame shifts,
/// the common intersection and the mean frame.
pub struct GlobalAligner<'a> {
    source: &'a dyn FrameSource,
    ranking: &'a FrameRanking,
    config: AlignConfig,
    gauss_width: usize,
    candidates: Vec<RectCandidate>,
    alignment_rect: Option<Rect>,
    frame_shifts: Option<Vec<FrameShift>>,
    intersection: Rect,
    offsets: Vec<[isize; 2]>,
    mean_frame: Option<Array2<f32>>,
    average_frame_number: usize,
    quality_loss_percent: f64,
    /// Intersection and mean frame before any ROI was applied.
    full_view: Option<(Rect, Array2<f32>)>,
}

impl<'a> GlobalAligner<'a> {
    /// `gauss_width` is the extra blur of the coarse correlation phase.
    pub fn new(
        source: &'a dyn FrameSource,
        ranking: &'a FrameRanking,
        config: AlignConfig,
        gauss_width: usize,
    ) -> Self {
        Self {
            source,
            ranking,
            config,
            gauss_width,
            candidates: Vec::new(),
            alignment_rect: None,
            frame_shifts: None,
            intersection: Rect::default(),
            offsets: Vec::new(),
            mean_frame: None,
            average_frame_number: 0,
            quality_loss_percent: 0.0,
            full_view: None,
        }
    }

    pub fn candidates(&self) -> &[RectCandidate] {
        &self.candidates
    }

    pub fn alignment_rect(&self) -> Option<Rect> {
        self.alignment_rect
    }

    pub fn frame_shifts(&self) -> Option<&[FrameShift]> {
        self.frame_shifts.as_deref()
    }

    /// Region common to all shifted frames, in reference-frame coordinates.
    pub fn intersection(&self) -> Rect {
        self.intersection
    }

    /// Per-frame position `[dy, dx]` of the intersection origin inside the frame.
    pub fn offsets(&self) -> &[[isize; 2]] {
        &self.offsets
    }

    pub fn mean_frame(&self) -> Option<&Array2<f32>> {
        self.mean_frame.as_ref()
    }

    /// Number of frames that went into the mean frame.
    pub fn average_frame_number(&self) -> usize {
        self.average_frame_number
    }

    /// Quality lost by restricting the mean-frame contributors to a time window.
    pub fn quality_loss_percent(&self) -> f64 {
        self.quality_loss_percent
    }

    /// Rank candidate alignment rectangles of extent `frame / scale_factor`
    /// on the best frame. The list is sorted by descending structure and the
    /// best candidate becomes the active rectangle.
    pub fn compute_alignment_rect(&mut self, scale_factor: f64) -> Result<&[RectCandidate]> {
        let (h, w) = self.source.shape();
        let border = self.config.border_width + self.config.search_width;
        if h < 2 * border || w < 2 * border || scale_factor <= 0.0 {
            return Err(StackError::Argument(format!(
                "frame {}x{} too small for alignment rectangles with border {}",
                w, h, border
            )));
        }
        let rect_y = ((h - 2 * border) as f64 / scale_factor) as usize;
        let rect_x = ((w - 2 * border) as f64 / scale_factor) as usize;
        let step_y = (rect_y / 2).max(1);
        let step_x = (rect_x / 2).max(1);
        if rect_y == 0 || rect_x == 0 {
            return Err(StackError::Argument(
                "alignment rectangle would have zero size".into(),
            ));
        }

        let best = self
            .source
            .frame_mono_blurred(self.ranking.frame_ranks_max_index)?;
        let mut candidates = Vec::new();
        let mut x_low = border;
        while x_low + rect_x <= w - border {
            let mut y_low = border;
            while y_low + rect_y <= h - border {
                let rect = Rect::new(y_low, y_low + rect_y, x_low, x_low + rect_x);
                let quality = quality_measure_threshold_weighted(
                    best.slice(s![rect.y_low..rect.y_high, rect.x_low..rect.x_high]),
                    self.config.rectangle_stride,
                    self.config.rectangle_black_threshold,
                    self.config.rectangle_min_fraction,
                );
                candidates.push(RectCandidate { rect, quality });
                y_low += step_y;
            }
            x_low += step_x;
        }

        if candidates.is_empty() {
            return Err(StackError::Argument(
                "no alignment rectangle fits into the frame".into(),
            ));
        }
        candidates.sort_by(|a, b| b.quality.total_cmp(&a.quality));
        debug!(
            candidates = candidates.len(),
            height = rect_y,
            width = rect_x,
            best_quality = candidates[0].quality,
            "Computed alignment rectangle candidates"
        );

        self.alignment_rect = Some(candidates[0].rect);
        self.candidates = candidates;
        Ok(&self.candidates)
    }

    /// Make candidate `index` the active alignment rectangle.
    pub fn select_alignment_rect(&mut self, index: usize) -> Result<Rect> {
        let candidate = self.candidates.get(index).ok_or_else(|| {
            StackError::Argument(format!(
                "alignment rectangle index {} out of range ({} candidates)",
                index,
                self.candidates.len()
            ))
        })?;
        self.alignment_rect = Some(candidate.rect);
        Ok(candidate.rect)
    }

    /// Use `rect` as the only alignment rectangle.
    pub fn set_alignment_rect(&mut self, rect: Rect) -> Result<()> {
        let (h, w) = self.source.shape();
        if rect.is_empty() || rect.y_high > h || rect.x_high > w {
            return Err(StackError::Argument(format!(
                "alignment rectangle {} does not fit into a {}x{} frame",
                rect, w, h
            )));
        }
        self.candidates = vec![RectCandidate { rect, quality: 0.0 }];
        self.alignment_rect = Some(rect);
        Ok(())
    }

    /// Measure the global shift of every frame relative to the best frame and
    /// derive the frame intersection.
    ///
    /// Frames are visited from the reference frame backwards to the first
    /// frame, then from the reference frame forward to the last one, so that
    /// the accumulated drift always refers to a temporally close frame.
    pub fn align_frames(&mut self, reporter: &dyn ProgressReporter) -> Result<()> {
        let total = self.source.count();
        if total == 0 {
            return Err(StackError::EmptySequence);
        }
        let max_index = self.ranking.frame_ranks_max_index;
        self.frame_shifts = None;
        self.mean_frame = None;
        self.full_view = None;

        info!(
            total_frames = total,
            reference_frame = max_index,
            mode = %self.config.mode,
            method = %self.config.method,
            "Aligning frames"
        );
        let progress = PhaseProgress::new(reporter, PipelinePhase::AlignFrames, total + 1);

        let shifts = match self.config.mode {
            AlignMode::Planet => self.align_planet(max_index, &progress)?,
            AlignMode::Surface => {
                let rect = self.alignment_rect.ok_or_else(|| {
                    StackError::WrongOrdering(
                        "alignment rectangle must be set before aligning in surface mode".into(),
                    )
                })?;
                let (shifts, state) = self.align_surface(rect, max_index, &progress)?;
                self.alignment_rect = Some(state.rect);
                shifts
            }
        };
        progress.finish();

        let (h, w) = self.source.shape();
        let y_low = shifts.iter().map(|s| s[0]).max().unwrap_or(0) as isize;
        let y_high = shifts.iter().map(|s| s[0]).min().unwrap_or(0) as isize + h as isize;
        let x_low = shifts.iter().map(|s| s[1]).max().unwrap_or(0) as isize;
        let x_high = shifts.iter().map(|s| s[1]).min().unwrap_or(0) as isize + w as isize;
        if y_low < 0 || x_low < 0 || y_high <= y_low || x_high <= x_low {
            return Err(StackError::Argument(
                "frame shifts leave an empty intersection".into(),
            ));
        }
        self.intersection = Rect::new(y_low as usize, y_high as usize, x_low as usize, x_high as usize);
        self.frame_shifts = Some(shifts);
        self.update_offsets();

        info!(intersection = %self.intersection, "Frame alignment complete");
        Ok(())
    }

    fn frame_order(total: usize, max_index: usize) -> impl Iterator<Item = usize> {
        (0..=max_index).rev().chain(max_index..total)
    }

    fn align_surface(
        &self,
        rect: Rect,
        max_index: usize,
        progress: &PhaseProgress,
    ) -> Result<(Vec<FrameShift>, AlignmentState)> {
        let total = self.source.count();
        let shape = self.source.shape();
        let search_width = self.config.search_width;
        let border = self.config.border_width;
        let reference = self.source.frame_mono_blurred(max_index)?;

        let mut state = AlignmentState::new(rect);
        let mut reference_box = cut_box(&reference, state.rect);
        let mut first_phase = reference_box.slice(s![..;2, ..;2]).to_owned();
        let params = SearchParams {
            method: self.config.method,
            search_width,
            sampling_stride: self.config.sampling_stride,
            sub_pixel: false,
            blur_width: self.gauss_width,
            weight_matrix: None,
        };

        let mut shifts = vec![[0i32; 2]; total];
        for index in Self::frame_order(total, max_index) {
            progress.advance()?;
            if index == max_index {
                state.reset_cumulative();
                continue;
            }
            let frame = self.source.frame_mono_blurred(index)?;
            let search_ref = SearchReference {
                reference: reference_box.view(),
                first_phase: Some(first_phase.view()),
            };

            if self.config.method == SearchMethod::Translation {
                let shift = compute_shift_configured(&search_ref, frame.view(), Window::from(state.rect), &params)
                    .map_err(|e| StackError::Internal {
                        frame: index,
                        reason: e.to_string(),
                    })?;
                shifts[index] = [shift.dy as i32, shift.dx as i32];
                continue;
            }

            let shift = compute_shift_configured(&search_ref, frame.view(), state.window(), &params)
                .map_err(|e| StackError::Internal {
                    frame: index,
                    reason: e.to_string(),
                })?;
            state.cum_dy += shift.dy.round() as isize;
            state.cum_dx += shift.dx.round() as isize;
            shifts[index] = [state.cum_dy as i32, state.cum_dx as i32];

            state.check_fit(shape, search_width, border)?;
            if state.recenter(shape, search_width, border) {
                debug!(frame = index, rect = %state.rect, "Re-centered alignment rectangle");
                reference_box = cut_box(&reference, state.rect);
                first_phase = reference_box.slice(s![..;2, ..;2]).to_owned();
            }
        }

        Ok((shifts, state))
    }

    fn align_planet(&self, max_index: usize, progress: &PhaseProgress) -> Result<Vec<FrameShift>> {
        let total = self.source.count();
        let reference = self.source.frame_mono_blurred(max_index)?;
        let reference_cog = center_of_gravity(&reference).ok_or_else(|| StackError::Internal {
            frame: max_index,
            reason: "center of gravity outside the frame".into(),
        })?;

        let mut shifts = vec![[0i32; 2]; total];
        for index in Self::frame_order(total, max_index) {
            progress.advance()?;
            if index == max_index {
                continue;
            }
            let frame = self.source.frame_mono_blurred(index)?;
            let cog = center_of_gravity(&frame).ok_or_else(|| StackError::Internal {
                frame: index,
                reason: "center of gravity outside the frame".into(),
            })?;
            shifts[index] = [
                (reference_cog.0 - cog.0) as i32,
                (reference_cog.1 - cog.1) as i32,
            ];
        }
        Ok(shifts)
    }

    fn update_offsets(&mut self) {
        let Some(shifts) = &self.frame_shifts else {
            self.offsets.clear();
            return;
        };
        let (y_low, x_low) = (self.intersection.y_low as isize, self.intersection.x_low as isize);
        self.offsets = shifts
            .iter()
            .map(|s| [y_low - s[0] as isize, x_low - s[1] as isize])
            .collect();
    }

    /// Average the best frames on the intersection into the mean frame
    /// (16-bit working scale). `number` overrides the configured share of
    /// frames.
    pub fn average_frame(&mut self, number: Option<usize>, reporter: &dyn ProgressReporter) -> Result<&Array2<f32>> {
        if self.frame_shifts.is_none() {
            return Err(StackError::WrongOrdering(
                "frames must be aligned before averaging".into(),
            ));
        }
        let total = self.source.count();
        let count = number
            .unwrap_or_else(|| (total as f64 * self.config.average_frame_percent / 100.0).ceil() as usize)
            .clamp(1, total);

        let indices = if self.config.fast_changing_object {
            let window = (count * self.config.best_frames_window_extension).min(total);
            let best = self.ranking.find_best_frames(count, window)?;
            self.quality_loss_percent = best.quality_loss_percent;
            best.indices
        } else {
            self.quality_loss_percent = 0.0;
            self.ranking.best_indices(count).to_vec()
        };

        // The mean frame always refers to the full intersection.
        if let Some((full, _)) = self.full_view.take() {
            self.intersection = full;
            self.update_offsets();
        }

        let (h, w) = (self.intersection.height(), self.intersection.width());
        let progress = PhaseProgress::new(reporter, PipelinePhase::AverageFrame, indices.len());
        let mut sum = Array2::<f32>::zeros((h, w));
        for &index in &indices {
            let mono = self.source.frame_mono(index)?;
            let [dy, dx] = self.offsets[index];
            let (dy, dx) = (dy as usize, dx as usize);
            sum += &mono.slice(s![dy..dy + h, dx..dx + w]);
            progress.advance()?;
        }
        let scale = self.source.bit_depth().working_scale() / indices.len() as f32;
        sum.mapv_inplace(|v| v * scale);
        progress.finish();

        info!(
            frames = indices.len(),
            quality_loss_percent = self.quality_loss_percent,
            "Computed mean frame"
        );
        self.average_frame_number = indices.len();
        self.mean_frame = Some(sum);
        self.mean_frame.as_ref().ok_or(StackError::EmptySequence)
    }

    /// Restrict the intersection and the mean frame to a region given
    /// relative to the full intersection. All bounds zero selects the full
    /// intersection again.
    pub fn set_roi(&mut self, y_min: usize, y_max: usize, x_min: usize, x_max: usize) -> Result<()> {
        if self.mean_frame.is_none() {
            return Err(StackError::WrongOrdering(
                "the mean frame must be computed before setting an ROI".into(),
            ));
        }
        if y_min == 0 && y_max == 0 && x_min == 0 && x_max == 0 {
            self.reset_roi();
            return Ok(());
        }

        let (full, full_mean) = match self.full_view.take() {
            Some(view) => view,
            None => {
                let mean = self.mean_frame.take().ok_or(StackError::EmptySequence)?;
                (self.intersection, mean)
            }
        };
        let (h, w) = full_mean.dim();
        if y_min >= y_max || x_min >= x_max || y_max > h || x_max > w {
            warn!(y_min, y_max, x_min, x_max, "Rejected invalid ROI");
            self.intersection = full;
            self.mean_frame = Some(full_mean);
            self.update_offsets();
            return Err(StackError::Argument(format!(
                "ROI y {}..{}, x {}..{} does not fit into the {}x{} intersection",
                y_min, y_max, x_min, x_max, w, h
            )));
        }

        self.intersection = Rect::new(
            full.y_low + y_min,
            full.y_low + y_max,
            full.x_low + x_min,
            full.x_low + x_max,
        );
        self.mean_frame = Some(full_mean.slice(s![y_min..y_max, x_min..x_max]).to_owned());
        self.full_view = Some((full, full_mean));
        self.update_offsets();
        debug!(roi = %self.intersection, "Applied region of interest");
        Ok(())
    }

    /// Undo [`GlobalAligner::set_roi`]. No-op without an active ROI.
    pub fn reset_roi(&mut self) {
        if let Some((full, full_mean)) = self.full_view.take() {
            self.intersection = full;
            self.mean_frame = Some(full_mean);
            self.update_offsets();
        }
    }
}

fn cut_box(frame: &Array2<f32>, rect: Rect) -> Array2<f32> {
    frame
        .slice(s![rect.y_low..rect.y_high, rect.x_low..rect.x_high])
        .to_owned()
}

/// Brightness center of gravity `(y, x)` of the upper half of the value range,
/// rounded to whole pixels. `None` if it does not lie strictly inside the frame.
pub fn center_of_gravity(frame: &Array2<f32>) -> Option<(isize, isize)> {
    let (h, w) = frame.dim();
    let max = frame.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let threshold = (max / 2.0).floor();

    let (mut m00, mut m01, mut m10) = (0.0f64, 0.0f64, 0.0f64);
    for ((y, x), &v) in frame.indexed_iter() {
        let value = (v.max(threshold) - threshold) as f64;
        m00 += value;
        m01 += y as f64 * value;
        m10 += x as f64 * value;
    }
    if m00 <= 0.0 {
        return None;
    }

    let cog_y = (m01 / m00).round() as isize;
    let cog_x = (m10 / m00).round() as isize;
    if cog_y > 0 && cog_y < h as isize && cog_x > 0 && cog_x < w as isize {
        Some((cog_y, cog_x))
    } else {
        None
    }
}
