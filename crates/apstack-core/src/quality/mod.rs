pub mod gradient;
pub mod laplacian;
pub mod ranking;

use ndarray::ArrayView2;

use crate::pipeline::config::RankMethod;

pub use ranking::{rank_frames, BestFrames, FrameRanking};

/// Score an image region with the given sharpness measure, sampling the
/// region down by `stride` first. Higher means sharper.
pub fn score_with_method(data: ArrayView2<f32>, method: RankMethod, stride: usize) -> f64 {
    match method {
        RankMethod::Laplace => laplacian::laplace_contrast(data, stride),
        RankMethod::XyGradient => gradient::local_contrast(data, stride),
        RankMethod::Sobel => gradient::sobel_contrast(data, stride),
    }
}
