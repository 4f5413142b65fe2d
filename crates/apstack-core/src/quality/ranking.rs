use rayon::prelude::*;
use tracing::{debug, info};

use crate::consts::{BRIGHTNESS_EPSILON, PARALLEL_FRAME_THRESHOLD};
use crate::error::{Result, StackError};
use crate::pipeline::config::RankMethod;
use crate::pipeline::{PhaseProgress, PipelinePhase, ProgressReporter};
use crate::source::FrameSource;

use super::laplacian::std_dev;
use super::score_with_method;

/// Global quality ranking of all frames.
#[derive(Clone, Debug)]
pub struct FrameRanking {
    /// Per-frame score, normalized so that the best frame scores 1.0.
    pub frame_ranks: Vec<f64>,
    /// Frame indices ordered by descending score; ties keep index order.
    pub quality_sorted_indices: Vec<usize>,
    pub frame_ranks_max_index: usize,
    /// Best score before normalization.
    pub frame_ranks_max_value: f64,
    /// Per-frame average brightness, present when brightness normalization is on.
    pub average_brightness: Option<Vec<f64>>,
    pub median_brightness: Option<f64>,
}

/// Frames selected from a short time window for a fast-changing object.
#[derive(Clone, Debug)]
pub struct BestFrames {
    /// Selected frame indices, best first.
    pub indices: Vec<usize>,
    /// Score lost compared to the globally best frames, in percent.
    pub quality_loss_percent: f64,
    /// Mean index of the selected frames.
    pub cog_mean_frame: f64,
}

/// Stable ordering of indices by descending value.
pub(crate) fn sorted_descending(values: &[f64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    indices
}

pub(crate) fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Score the sharpness of every frame.
///
/// `Laplace` uses the stored strided Laplacian of each frame; the other
/// methods run on the blurred frame with `pixel_stride`. With
/// `normalization_threshold` set (native scale), each score is scaled by
/// `median_brightness / brightness` to compensate for brightness variations.
pub fn rank_frames(
    source: &dyn FrameSource,
    method: RankMethod,
    pixel_stride: usize,
    normalization_threshold: Option<f32>,
    reporter: &dyn ProgressReporter,
) -> Result<FrameRanking> {
    let total = source.count();
    if total == 0 {
        return Err(StackError::EmptySequence);
    }
    info!(total_frames = total, %method, "Ranking frames");

    let progress = PhaseProgress::new(reporter, PipelinePhase::RankFrames, total);
    let score = |index: usize| -> Result<f64> {
        let value = match method {
            RankMethod::Laplace => std_dev(source.frame_mono_blurred_laplacian(index)?.view()),
            _ => score_with_method(source.frame_mono_blurred(index)?.view(), method, pixel_stride),
        };
        progress.advance()?;
        Ok(value)
    };

    let mut ranks: Vec<f64> = if total >= PARALLEL_FRAME_THRESHOLD {
        (0..total).into_par_iter().map(score).collect::<Result<_>>()?
    } else {
        (0..total).map(score).collect::<Result<_>>()?
    };

    let (average_brightness, median_brightness) = match normalization_threshold {
        Some(threshold) => {
            let brightness: Vec<f64> = (0..total)
                .map(|i| source.average_brightness(i, threshold))
                .collect::<Result<_>>()?;
            let median_value = median(&brightness);
            for (rank, b) in ranks.iter_mut().zip(&brightness) {
                *rank *= median_value / (b + BRIGHTNESS_EPSILON);
            }
            debug!(median_brightness = median_value, "Applied brightness normalization");
            (Some(brightness), Some(median_value))
        }
        None => (None, None),
    };

    let quality_sorted_indices = sorted_descending(&ranks);
    let frame_ranks_max_index = quality_sorted_indices[0];
    let frame_ranks_max_value = ranks[frame_ranks_max_index];
    if frame_ranks_max_value > 0.0 {
        for rank in &mut ranks {
            *rank /= frame_ranks_max_value;
        }
    }
    progress.finish();

    info!(
        best_frame = frame_ranks_max_index,
        best_score = frame_ranks_max_value,
        "Frame ranking complete"
    );

    Ok(FrameRanking {
        frame_ranks: ranks,
        quality_sorted_indices,
        frame_ranks_max_index,
        frame_ranks_max_value,
        average_brightness,
        median_brightness,
    })
}

impl FrameRanking {
    pub fn len(&self) -> usize {
        self.frame_ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_ranks.is_empty()
    }

    /// Indices of the `count` best frames, best first.
    pub fn best_indices(&self, count: usize) -> &[usize] {
        &self.quality_sorted_indices[..count.min(self.len())]
    }

    /// Pick `count` good frames that lie within `window` consecutive indices.
    ///
    /// Every window position is scored by the sum of its `count` best ranks; the
    /// best window wins, the earliest one on ties. Within the window, frames are
    /// ordered by descending rank with index order breaking ties.
    pub fn find_best_frames(&self, count: usize, window: usize) -> Result<BestFrames> {
        let total = self.len();
        if total == 0 {
            return Err(StackError::EmptySequence);
        }
        if count == 0 || window == 0 {
            return Err(StackError::Argument(
                "best frame count and window size must be at least 1".into(),
            ));
        }
        let window = window.min(total);
        let count = count.min(window);

        let top_sum = |indices: &mut Vec<usize>| -> f64 {
            indices.sort_by(|&a, &b| self.frame_ranks[b].total_cmp(&self.frame_ranks[a]));
            indices.iter().take(count).map(|&i| self.frame_ranks[i]).sum()
        };

        let mut best_start = 0;
        let mut best_sum = f64::NEG_INFINITY;
        for start in 0..=total - window {
            let mut indices: Vec<usize> = (start..start + window).collect();
            let sum = top_sum(&mut indices);
            if sum > best_sum {
                best_sum = sum;
                best_start = start;
            }
        }

        let mut indices: Vec<usize> = (best_start..best_start + window).collect();
        top_sum(&mut indices);
        indices.truncate(count);

        let global_sum: f64 = self
            .best_indices(count)
            .iter()
            .map(|&i| self.frame_ranks[i])
            .sum();
        let quality_loss_percent = if global_sum > 0.0 {
            100.0 * (1.0 - best_sum / global_sum)
        } else {
            0.0
        };
        let cog_mean_frame = indices.iter().sum::<usize>() as f64 / indices.len() as f64;

        debug!(
            window_start = best_start,
            window,
            count,
            quality_loss_percent,
            "Selected best frames window"
        );

        Ok(BestFrames {
            indices,
            quality_loss_percent,
            cog_mean_frame,
        })
    }
}
