use ndarray::Array3;
use tracing::{debug, info, warn};

use crate::align::GlobalAligner;
use crate::error::{Result, StackError};
use crate::frame::{FrameShift, Rect};
use crate::quality::{rank_frames, FrameRanking};
use crate::source::FrameSource;
use crate::stack::engine::normalization_threshold;
use crate::stack::{AlignmentPoint, AlignmentPoints, StackEngine};

use super::config::{AlignMode, StackConfig};
use super::types::ProgressReporter;

/// Diagnostics of one stacking job.
#[derive(Clone, Debug, Default)]
pub struct StackingReport {
    /// Count of local shifts per rounded magnitude in pixels.
    pub shift_distribution: Vec<usize>,
    /// Failed local shift measurements in percent, `-1` if none were made.
    pub failure_percent: f64,
    /// Rendered shift distribution, empty if no shift was measured.
    pub shift_table: String,
    /// Points dropped for low brightness or contrast.
    pub dropped_dim: usize,
    /// Points dropped for too little structure.
    pub dropped_structure: usize,
    pub stack_size: usize,
    pub alignment_point_count: usize,
    /// Active alignment rectangle; `None` in planet mode.
    pub alignment_rect: Option<Rect>,
    /// Alignment rectangles tried before one succeeded.
    pub alignment_rects_tried: usize,
    pub average_frame_number: usize,
    pub quality_loss_percent: f64,
    pub stacking_holes: usize,
    pub drizzle_holes: usize,
}

/// Results of [`run_stacking`].
#[derive(Clone, Debug)]
pub struct StackingOutput {
    pub frame_ranking: FrameRanking,
    pub frame_shifts: Vec<FrameShift>,
    /// Region common to all aligned frames, after applying the ROI.
    pub intersection: Rect,
    pub alignment_points: Vec<AlignmentPoint>,
    /// Stacked image on the full 16-bit scale, shape `(h, w, channels)`.
    pub stacked_image: Array3<u16>,
    pub report: StackingReport,
}

impl StackingOutput {
    /// Shape `(height, width)` of the frame intersection.
    pub fn intersection_shape(&self) -> (usize, usize) {
        (self.intersection.height(), self.intersection.width())
    }
}

/// Align frames, trying alignment rectangles in order of quality until one
/// works for every frame. Returns the number of rectangles tried.
fn align_surface(aligner: &mut GlobalAligner, config: &StackConfig, reporter: &dyn ProgressReporter) -> Result<usize> {
    let candidates = match config.align.alignment_rect {
        Some(rect) => {
            aligner.set_alignment_rect(rect)?;
            1
        }
        None => aligner
            .compute_alignment_rect(config.align.rectangle_scale_factor)?
            .len(),
    };

    let mut failed_frame = 0;
    for index in 0..candidates {
        let rect = aligner.select_alignment_rect(index)?;
        match aligner.align_frames(reporter) {
            Ok(()) => return Ok(index + 1),
            Err(StackError::Internal { frame, reason }) => {
                warn!(rect = %rect, frame, reason = %reason, "Alignment rectangle failed, trying next");
                failed_frame = frame;
            }
            Err(e) => return Err(e),
        }
    }
    Err(StackError::AlignmentFailed {
        frame: failed_frame,
        tried: candidates,
    })
}

/// Run a complete stacking job: rank, align, average, place alignment
/// points, rank locally, stack and merge.
pub fn run_stacking(
    source: &dyn FrameSource,
    config: &StackConfig,
    reporter: &dyn ProgressReporter,
) -> Result<StackingOutput> {
    config.validate()?;
    let total = source.count();
    if total == 0 {
        return Err(StackError::EmptySequence);
    }
    let (h, w) = source.shape();
    info!(
        total_frames = total,
        height = h,
        width = w,
        color = source.is_color(),
        depth = %source.bit_depth(),
        "Starting stacking job"
    );

    let threshold = config
        .frames
        .normalization
        .then(|| normalization_threshold(config, source.bit_depth()));
    let ranking = rank_frames(
        source,
        config.rank.method,
        config.rank.pixel_stride,
        threshold,
        reporter,
    )?;

    let mut aligner = GlobalAligner::new(source, &ranking, config.align.clone(), config.frames.gauss_width);
    let rects_tried = match config.align.mode {
        AlignMode::Surface => align_surface(&mut aligner, config, reporter)?,
        AlignMode::Planet => {
            aligner.align_frames(reporter)?;
            0
        }
    };

    aligner.average_frame(None, reporter)?;
    if let Some(roi) = config.align.roi {
        aligner.set_roi(roi.y_low, roi.y_high, roi.x_low, roi.x_high)?;
    }
    let mean_frame = aligner.mean_frame().ok_or_else(|| {
        StackError::WrongOrdering("mean frame missing after averaging".into())
    })?;
    let intersection = aligner.intersection();
    debug!(
        intersection = %intersection,
        average_frame_number = aligner.average_frame_number(),
        "Mean frame ready"
    );

    let mut points = AlignmentPoints::new(mean_frame, config.alignment_points.clone(), config.frames.gauss_width);
    points.create_ap_grid()?;
    points.compute_frame_qualities(source, aligner.offsets(), config.rank.method, reporter)?;

    let mut engine = StackEngine::new(
        source,
        &ranking,
        aligner.offsets(),
        (intersection.height(), intersection.width()),
        config,
    )?;
    engine.check_memory_budget(&points)?;
    engine.stack_frames(&mut points, reporter)?;
    let stacked_image = engine.merge_alignment_point_buffers(&points, reporter)?;

    let statistics = engine.statistics();
    let report = StackingReport {
        shift_distribution: statistics.distribution.clone(),
        failure_percent: statistics.failure_percent(),
        shift_table: statistics.shift_table(),
        dropped_dim: points.dropped_dim,
        dropped_structure: points.dropped_structure,
        stack_size: points.stack_size(),
        alignment_point_count: points.len(),
        alignment_rect: aligner.alignment_rect(),
        alignment_rects_tried: rects_tried,
        average_frame_number: aligner.average_frame_number(),
        quality_loss_percent: aligner.quality_loss_percent(),
        stacking_holes: engine.number_stacking_holes(),
        drizzle_holes: engine.drizzle_holes(),
    };
    info!(
        alignment_points = report.alignment_point_count,
        stack_size = report.stack_size,
        failure_percent = report.failure_percent,
        "Stacking job complete"
    );

    let frame_shifts = aligner.frame_shifts().map(<[FrameShift]>::to_vec).unwrap_or_default();
    Ok(StackingOutput {
        frame_shifts,
        intersection,
        alignment_points: points.points,
        stacked_image,
        report,
        frame_ranking: ranking,
    })
}
